use std::collections::BTreeMap;

use crate::proposal::parser::{parse_date, ProposalParser};
use crate::proposal::{ParseError, ProposalData};

const MAX_HEADER_SCAN_LINES: usize = 400;
const DEP_TITLE_SCAN_LINES: usize = 40;

/// Keys accepted without the leading `:` of an RST field list.
const BARE_HEADER_KEYS: [&str; 8] = [
    "pep", "dep", "title", "author", "status", "type", "topic", "created",
];

pub(super) fn parse_pep(
    parser: &ProposalParser,
    file_path: &str,
    text: &str,
) -> Result<ProposalData, ParseError> {
    let mut headers = parse_headers(text);
    let Some(pep_value) = headers.remove("pep") else {
        return Err(ParseError::MissingNumber {
            kind: parser.kind(),
            path: file_path.to_string(),
        });
    };
    let number = parser.number_from_header(file_path, &pep_value)?;

    let title = headers.remove("title").unwrap_or_default();
    let status = headers.remove("status").unwrap_or_default();
    if title.is_empty() || status.is_empty() {
        return Err(parser.missing_fields(file_path));
    }

    let mut extra = BTreeMap::new();
    if let Some(topic) = headers.remove("topic") {
        extra.insert("topic".to_string(), topic);
    }

    Ok(ProposalData {
        number,
        title,
        status,
        proposal_type: headers.remove("type"),
        author: headers.remove("author"),
        created_date: headers.get("created").and_then(|raw| parse_date(raw)),
        file_path: file_path.to_string(),
        full_text: text.to_string(),
        extra,
    })
}

pub(super) fn parse_dep(
    parser: &ProposalParser,
    file_path: &str,
    text: &str,
) -> Result<ProposalData, ParseError> {
    let mut headers = parse_headers(text);
    let number = match headers.remove("dep") {
        Some(value) => parser.number_from_header(file_path, &value)?,
        None => parser.proposal_number(file_path)?,
    };

    let mut title = headers.remove("title").unwrap_or_default();
    if title.is_empty() {
        title = dep_title_from_body(text).unwrap_or_default();
    }
    let status = headers.remove("status").unwrap_or_default();
    if title.is_empty() || status.is_empty() {
        return Err(parser.missing_fields(file_path));
    }

    Ok(ProposalData {
        number,
        title,
        status,
        proposal_type: headers.remove("type"),
        author: headers.remove("author"),
        created_date: headers.get("created").and_then(|raw| parse_date(raw)),
        file_path: file_path.to_string(),
        full_text: text.to_string(),
        extra: BTreeMap::new(),
    })
}

/// Collect the contiguous header block near the top of an RST document.
///
/// Leading blank lines, adornment lines and unrelated text are skipped until
/// the first header line; after that the block ends at the first blank or
/// non-header line.
pub(super) fn parse_headers(text: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    let mut started = false;

    for line in text.lines().take(MAX_HEADER_SCAN_LINES) {
        let stripped = line.trim();
        if !started {
            if stripped.is_empty() || is_adornment(stripped) {
                continue;
            }
            let Some((key, value)) = header_line(stripped) else {
                continue;
            };
            if !stripped.starts_with(':') && !BARE_HEADER_KEYS.contains(&key.as_str()) {
                continue;
            }
            started = true;
            headers.insert(key, value);
            continue;
        }

        if stripped.is_empty() {
            break;
        }
        let Some((key, value)) = header_line(stripped) else {
            break;
        };
        headers.insert(key, value);
    }

    headers
}

/// `:Key: value` or `Key: value`; keys are lower-cased with spaces as `_`.
fn header_line(stripped: &str) -> Option<(String, String)> {
    let rest = stripped.strip_prefix(':').unwrap_or(stripped).trim_start();
    let colon = rest.find(':')?;
    let raw_key = &rest[..colon];
    let mut chars = raw_key.chars();
    let first = chars.next()?;
    let valid_key = first.is_ascii_alphabetic()
        && raw_key.len() >= 2
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ' ');
    if !valid_key {
        return None;
    }
    let value = rest[colon + 1..].trim();
    if value.is_empty() {
        return None;
    }
    let key = raw_key.trim().to_ascii_lowercase().replace(' ', "_");
    Some((key, value.to_string()))
}

fn is_adornment(stripped: &str) -> bool {
    stripped.len() >= 3
        && stripped
            .chars()
            .all(|c| matches!(c, '=' | '-' | '`' | '~' | '^' | '+' | '*' | '#'))
}

/// Recover a DEP title from a `DEP <n>: <title>` or `DEP <n> <title>` line.
fn dep_title_from_body(text: &str) -> Option<String> {
    for line in text.lines().take(DEP_TITLE_SCAN_LINES) {
        let line = line.trim();
        let Some(head) = line.get(..3) else {
            continue;
        };
        if !head.eq_ignore_ascii_case("dep") {
            continue;
        }
        let after_keyword = &line[3..];
        let after_space = after_keyword.trim_start();
        if after_space.len() == after_keyword.len() {
            continue;
        }
        let digits_end = after_space
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after_space.len());
        if digits_end == 0 {
            continue;
        }
        let rest = &after_space[digits_end..];

        if let Some(title) = rest.trim_start().strip_prefix(':').map(str::trim) {
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }

        let boundary = rest
            .chars()
            .next()
            .is_some_and(|c| !(c.is_alphanumeric() || c == '_'));
        if boundary && !rest.trim().is_empty() {
            let title = rest
                .trim()
                .trim_start_matches([':', '-', '\u{2013}'])
                .trim();
            return Some(title.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{dep_title_from_body, parse_headers};
    use crate::proposal::parser::ProposalParser;
    use crate::proposal::ParseError;

    const PEP_8: &str = "PEP: 8\nTitle: Style Guide for Python Code\nAuthor: Guido van Rossum <guido@python.org>\nStatus: Active\nType: Process\nCreated: 05-Jul-2001\nPost-History: 05-Jul-2001, 01-Aug-2013\n\n\nIntroduction\n============\n\nThis document gives coding conventions.\n";

    #[test]
    fn parses_pep_bare_headers() {
        let data = ProposalParser::Pep
            .parse("peps/pep-0008.rst", PEP_8)
            .expect("PEP should parse");
        assert_eq!(data.number, 8);
        assert_eq!(data.title, "Style Guide for Python Code");
        assert_eq!(data.status, "Active");
        assert_eq!(data.proposal_type.as_deref(), Some("Process"));
        assert!(data.created_date.is_some());
    }

    #[test]
    fn field_list_block_stops_at_first_non_header_line() {
        let text = "\n=====\n:PEP: 123\n:Title: Field list\n:Status: Draft\nNot a header line\n:Topic: ignored\n";
        let headers = parse_headers(text);
        assert_eq!(headers.get("pep").map(String::as_str), Some("123"));
        assert_eq!(headers.get("status").map(String::as_str), Some("Draft"));
        assert!(!headers.contains_key("topic"));
    }

    #[test]
    fn bare_keys_outside_allow_list_do_not_start_the_block() {
        let text = "Note: preamble\nPEP: 9\nTitle: Allowed\nStatus: Final\n";
        let headers = parse_headers(text);
        assert!(!headers.contains_key("note"));
        assert_eq!(headers.get("pep").map(String::as_str), Some("9"));
    }

    #[test]
    fn pep_without_title_fails() {
        let err = ProposalParser::Pep
            .parse("peps/pep-0007.rst", ":PEP: 7\n:Status: Active\n")
            .expect_err("title is required for PEPs");
        assert!(matches!(err, ParseError::MissingFields { .. }));
    }

    #[test]
    fn pep_with_non_numeric_header_fails() {
        let err = ProposalParser::Pep
            .parse("peps/pep-0007.rst", "PEP: XXX\nTitle: T\nStatus: Draft\n")
            .expect_err("non-numeric PEP number");
        assert!(matches!(err, ParseError::InvalidNumber { .. }));
    }

    #[test]
    fn dep_falls_back_to_file_name_and_body_title() {
        let text = "=================================\nDEP 0014: Background workers\n=================================\n\n:Status: Draft\n:Type: Feature\n:Created: 2024-02-07\n";
        let data = ProposalParser::DjangoDep
            .parse("draft/0014-background-workers.rst", text)
            .expect("DEP should parse");
        assert_eq!(data.number, 14);
        assert_eq!(data.title, "Background workers");
        assert_eq!(data.status, "Draft");
    }

    #[test]
    fn dep_title_accepts_dash_separator() {
        assert_eq!(
            dep_title_from_body("DEP 5 - Class-based views\n").as_deref(),
            Some("Class-based views")
        );
        assert_eq!(dep_title_from_body("DEPRECATED 5 thing\n"), None);
    }
}
