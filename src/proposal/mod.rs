pub mod parser;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use parser::ProposalParser;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TrackerType {
    Eip,
    RustRfc,
    Pep,
    DjangoDep,
}

impl TrackerType {
    pub const ALL: [TrackerType; 4] = [
        TrackerType::Eip,
        TrackerType::RustRfc,
        TrackerType::Pep,
        TrackerType::DjangoDep,
    ];

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Eip => "eip",
            Self::RustRfc => "rust_rfc",
            Self::Pep => "pep",
            Self::DjangoDep => "django_dep",
        }
    }

    /// Upstream repository used to build file links when the tracker points
    /// somewhere other than GitHub.
    pub fn default_repo_url(&self) -> &'static str {
        match self {
            Self::Eip => "https://github.com/ethereum/EIPs",
            Self::RustRfc => "https://github.com/rust-lang/rfcs",
            Self::Pep => "https://github.com/python/peps",
            Self::DjangoDep => "https://github.com/django/deps",
        }
    }

    pub fn parser(&self) -> ProposalParser {
        ProposalParser::for_tracker(*self)
    }
}

impl Display for TrackerType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let display = match self {
            Self::Eip => "EIP",
            Self::RustRfc => "Rust RFC",
            Self::Pep => "PEP",
            Self::DjangoDep => "Django DEP",
        };
        write!(f, "{display}")
    }
}

#[derive(Debug, Error)]
#[error("unknown tracker type: {0}")]
pub struct TrackerTypeParseError(pub String);

impl FromStr for TrackerType {
    type Err = TrackerTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "eip" | "erc" => Ok(Self::Eip),
            "rust_rfc" | "rfc" => Ok(Self::RustRfc),
            "pep" => Ok(Self::Pep),
            "django_dep" | "dep" => Ok(Self::DjangoDep),
            _ => Err(TrackerTypeParseError(s.to_string())),
        }
    }
}

/// One proposal file as parsed at a given commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalData {
    pub number: u32,
    pub title: String,
    pub status: String,
    pub proposal_type: Option<String>,
    pub author: Option<String>,
    pub created_date: Option<NaiveDateTime>,
    pub file_path: String,
    pub full_text: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ProposalData {
    pub fn content_hash(&self) -> String {
        sha256_hex(&self.full_text)
    }
}

/// Advisory change flags; event typing is decided by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChangeFlags {
    pub created: bool,
    pub status_changed: bool,
    pub content_modified: bool,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed reading {path}: {message}")]
    Read { path: String, message: String },
    #[error("could not extract {kind} number from filename: {name}")]
    NumberFromFilename { kind: &'static str, name: String },
    #[error("missing {kind} header in {path}")]
    MissingNumber { kind: &'static str, path: String },
    #[error("invalid {kind} header value in {path}: {value:?}")]
    InvalidNumber {
        kind: &'static str,
        path: String,
        value: String,
    },
    #[error("missing required {kind} fields in {path}")]
    MissingFields { kind: &'static str, path: String },
}

pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
