pub mod orchestrator;
pub mod runner;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::EventType;
use crate::proposal::TrackerType;

pub use orchestrator::{file_url, ProposalTracker};
pub use runner::check_all;
pub use sync::{sync_trackers, SyncSummary};

/// One detected change, shaped for notification and output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventReport {
    pub tracker_type: TrackerType,
    pub proposal_number: u32,
    pub title: String,
    pub event_type: EventType,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub commit_hash: String,
    pub detected_at: DateTime<Utc>,
    pub analysis_summary: String,
    pub analysis_detail: String,
    pub file_path: String,
    pub file_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Success,
    Failed,
    Skipped,
}

impl TrackerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// The more severe of two statuses: failed, then success, then skipped.
    pub fn worst(self, other: Self) -> Self {
        let rank = |status: Self| match status {
            Self::Failed => 2,
            Self::Success => 1,
            Self::Skipped => 0,
        };
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

impl Display for TrackerStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckAllResult {
    pub events: Vec<EventReport>,
    /// Keyed by `type:repo_url@branch`; trackers sharing a key report the
    /// worst status among them.
    pub tracker_statuses: BTreeMap<String, TrackerStatus>,
}

impl CheckAllResult {
    /// `(success, failed, skipped)`.
    pub fn status_counts(&self) -> (usize, usize, usize) {
        let count = |wanted: TrackerStatus| {
            self.tracker_statuses
                .values()
                .filter(|status| **status == wanted)
                .count()
        };
        (
            count(TrackerStatus::Success),
            count(TrackerStatus::Failed),
            count(TrackerStatus::Skipped),
        )
    }
}
