use std::collections::BTreeMap;

use crate::proposal::parser::{file_stem, keyed_value, ProposalParser};
use crate::proposal::{ParseError, ProposalData};

const MAX_SCAN_LINES: usize = 200;
const UNKNOWN_STATUS: &str = "unknown";

pub(super) fn parse_rfc(
    parser: &ProposalParser,
    file_path: &str,
    text: &str,
) -> Result<ProposalData, ParseError> {
    let number = parser.proposal_number(file_path)?;

    let mut title = String::new();
    let mut status = UNKNOWN_STATUS.to_string();
    let mut author = None;

    for raw in text.lines().take(MAX_SCAN_LINES) {
        let line = raw.trim();
        if title.is_empty() && line.starts_with('#') {
            title = line.trim_start_matches('#').trim().to_string();
            continue;
        }
        if let Some(value) = keyed_value(line, &["status", "state"]) {
            status = value.to_string();
            continue;
        }
        if let Some(value) = keyed_value(line, &["author"]) {
            author = Some(value.to_string());
        }
    }

    if title.is_empty() {
        title = file_stem(file_path).to_string();
    }

    Ok(ProposalData {
        number,
        title,
        status,
        proposal_type: None,
        author,
        created_date: None,
        file_path: file_path.to_string(),
        full_text: text.to_string(),
        extra: BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use crate::proposal::parser::ProposalParser;

    #[test]
    fn parses_heading_and_keyed_lines() {
        let text = "- Feature Name: nll\n\n# Summary\n\nStatus: Accepted\nAuthor: Niko\n";
        let data = ProposalParser::RustRfc
            .parse("text/2094-nll.md", text)
            .expect("RFC should parse");
        assert_eq!(data.number, 2094);
        assert_eq!(data.title, "Summary");
        assert_eq!(data.status, "Accepted");
        assert_eq!(data.author.as_deref(), Some("Niko"));
    }

    #[test]
    fn defaults_status_and_title() {
        let data = ProposalParser::RustRfc
            .parse("text/0042-no-heading.md", "plain body text\n")
            .expect("RFC parse never needs a status");
        assert_eq!(data.status, "unknown");
        assert_eq!(data.title, "0042-no-heading");
    }

    #[test]
    fn state_prefix_is_case_insensitive() {
        let data = ProposalParser::RustRfc
            .parse("text/0001-x.md", "# X\nSTATE : postponed\n")
            .expect("parse");
        assert_eq!(data.status, "postponed");
    }

    #[test]
    fn file_without_number_fails() {
        assert!(ProposalParser::RustRfc.parse("text/README.md", "# Readme\n").is_err());
    }
}
