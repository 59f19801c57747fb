pub mod migrations;
pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::classifier::EventType;
use crate::proposal::TrackerType;

pub use store::SnapshotStore;

/// Identity of a tracker row; unique in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackerKey {
    pub tracker_type: TrackerType,
    pub repo_url: String,
    pub branch: String,
    pub proposal_dir: String,
    pub file_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tracker {
    pub id: i64,
    pub tracker_type: TrackerType,
    pub repo_url: String,
    pub branch: String,
    pub enabled: bool,
    pub proposal_dir: String,
    pub file_pattern: String,
    pub last_seen_commit: Option<String>,
    pub last_check_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tracker {
    pub fn key(&self) -> TrackerKey {
        TrackerKey {
            tracker_type: self.tracker_type,
            repo_url: self.repo_url.clone(),
            branch: self.branch.clone(),
            proposal_dir: self.proposal_dir.clone(),
            file_pattern: self.file_pattern.clone(),
        }
    }

    /// Label used in logs and run summaries: `type:repo@branch`.
    pub fn display_key(&self) -> String {
        format!(
            "{}:{}@{}",
            self.tracker_type.as_slug(),
            self.repo_url,
            self.branch
        )
    }
}

/// Last known parsed state of one proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalSnapshot {
    pub tracker_type: TrackerType,
    pub number: u32,
    pub title: String,
    pub status: String,
    pub proposal_type: Option<String>,
    pub author: Option<String>,
    pub created_date: Option<NaiveDateTime>,
    pub file_path: String,
    pub content_hash: String,
    pub extra: BTreeMap<String, String>,
    pub last_seen_commit: Option<String>,
    pub last_check_time: Option<DateTime<Utc>>,
    pub analysis_summary: Option<String>,
    pub analysis_detail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ProposalRef {
    pub tracker_type: TrackerType,
    pub number: u32,
}

/// Append-only audit record of a detected transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalEvent {
    pub id: i64,
    /// `None` for diagnostic records of files that failed to parse.
    pub proposal_ref: Option<ProposalRef>,
    pub event_type: EventType,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub commit_hash: String,
    pub detected_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub proposal_ref: Option<ProposalRef>,
    pub event_type: EventType,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub commit_hash: String,
    pub metadata: Map<String, Value>,
}
