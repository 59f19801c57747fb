mod date;
mod frontmatter;
mod markdown;
mod rst;

use std::path::Path;

use crate::proposal::{ChangeFlags, ParseError, ProposalData, TrackerType};

pub use date::parse_date;

/// Parser for one proposal file format, selected by tracker type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalParser {
    /// `---` front matter (EIP/ERC).
    Eip,
    /// Freeform markdown with the number in the file name (Rust RFC).
    RustRfc,
    /// RST field list with a mandatory `PEP:` header.
    Pep,
    /// RST field list, number and title recoverable from elsewhere (Django DEP).
    DjangoDep,
}

impl ProposalParser {
    pub fn for_tracker(tracker_type: TrackerType) -> Self {
        match tracker_type {
            TrackerType::Eip => Self::Eip,
            TrackerType::RustRfc => Self::RustRfc,
            TrackerType::Pep => Self::Pep,
            TrackerType::DjangoDep => Self::DjangoDep,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Eip => "EIP",
            Self::RustRfc => "RFC",
            Self::Pep => "PEP",
            Self::DjangoDep => "DEP",
        }
    }

    /// Parse the text of a proposal file. `file_path` is repository-relative
    /// and is kept on the result; it is also consulted for file-name number
    /// fallbacks.
    pub fn parse(&self, file_path: &str, text: &str) -> Result<ProposalData, ParseError> {
        match self {
            Self::Eip => frontmatter::parse_eip(self, file_path, text),
            Self::RustRfc => markdown::parse_rfc(self, file_path, text),
            Self::Pep => rst::parse_pep(self, file_path, text),
            Self::DjangoDep => rst::parse_dep(self, file_path, text),
        }
    }

    pub fn parse_file(&self, abs_path: &Path, rel_path: &str) -> Result<ProposalData, ParseError> {
        let bytes = std::fs::read(abs_path).map_err(|e| ParseError::Read {
            path: rel_path.to_string(),
            message: e.to_string(),
        })?;
        let text = String::from_utf8_lossy(&bytes);
        self.parse(rel_path, &text)
    }

    /// Proposal number derived from the file name alone.
    pub fn proposal_number(&self, file_path: &str) -> Result<u32, ParseError> {
        let name = file_name(file_path);
        let number = match self {
            Self::Eip => suffixed_number(name, &["eip-", "erc-"], ".md"),
            Self::Pep => suffixed_number(name, &["pep-"], ".rst"),
            Self::RustRfc => leading_digits(name),
            Self::DjangoDep => first_digit_run(file_stem(file_path)),
        };
        number
            .and_then(|digits| digits.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| ParseError::NumberFromFilename {
                kind: self.kind(),
                name: name.to_string(),
            })
    }

    /// Shell-style glob match against the file name, not the full path.
    pub fn matches_pattern(&self, file_path: &str, pattern: &str) -> bool {
        glob_match::glob_match(pattern, file_name(file_path))
    }

    pub fn compare(&self, old: Option<&ProposalData>, new: &ProposalData) -> ChangeFlags {
        match old {
            None => ChangeFlags {
                created: true,
                ..ChangeFlags::default()
            },
            Some(old) => ChangeFlags {
                created: false,
                status_changed: old.status.trim() != new.status.trim(),
                content_modified: old.content_hash() != new.content_hash(),
            },
        }
    }

    fn missing_fields(&self, file_path: &str) -> ParseError {
        ParseError::MissingFields {
            kind: self.kind(),
            path: file_path.to_string(),
        }
    }

    fn number_from_header(&self, file_path: &str, value: &str) -> Result<u32, ParseError> {
        first_digit_run(value)
            .and_then(|digits| digits.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .ok_or_else(|| ParseError::InvalidNumber {
                kind: self.kind(),
                path: file_path.to_string(),
                value: value.to_string(),
            })
    }
}

fn file_name(file_path: &str) -> &str {
    Path::new(file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_path)
}

fn file_stem(file_path: &str) -> &str {
    Path::new(file_path)
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or(file_path)
}

fn first_digit_run(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn leading_digits(text: &str) -> Option<&str> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    (end > 0).then(|| &text[..end])
}

/// Matches `<prefix><digits><suffix>` at the end of `name`, ignoring case.
fn suffixed_number<'a>(name: &'a str, prefixes: &[&str], suffix: &str) -> Option<&'a str> {
    if name.len() < suffix.len() || !name.is_char_boundary(name.len() - suffix.len()) {
        return None;
    }
    let (stem, tail) = name.split_at(name.len() - suffix.len());
    if !tail.eq_ignore_ascii_case(suffix) {
        return None;
    }
    let digits_start = stem
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let digits = &stem[digits_start..];
    if digits.is_empty() {
        return None;
    }
    let head = stem[..digits_start].to_ascii_lowercase();
    prefixes
        .iter()
        .any(|prefix| head.ends_with(prefix))
        .then_some(digits)
}

/// Case-insensitive `key:` prefix match; returns the trimmed value when non-empty.
fn keyed_value<'a>(line: &'a str, keys: &[&str]) -> Option<&'a str> {
    for key in keys {
        let Some(head) = line.get(..key.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(key) {
            continue;
        }
        let Some(rest) = line[key.len()..].trim_start().strip_prefix(':') else {
            continue;
        };
        let value = rest.trim();
        if !value.is_empty() {
            return Some(value);
        }
    }
    None
}
