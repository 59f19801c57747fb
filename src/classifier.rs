use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::proposal::ProposalData;

const MAX_CHANGED_SECTIONS: usize = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    StatusChanged,
    Accepted,
    Rejected,
    Withdrawn,
    Postponed,
    Resurrected,
    Superseded,
    ContentModified,
}

impl EventType {
    pub const ALL: [EventType; 9] = [
        EventType::Created,
        EventType::StatusChanged,
        EventType::Accepted,
        EventType::Rejected,
        EventType::Withdrawn,
        EventType::Postponed,
        EventType::Resurrected,
        EventType::Superseded,
        EventType::ContentModified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StatusChanged => "status_changed",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
            Self::Postponed => "postponed",
            Self::Resurrected => "resurrected",
            Self::Superseded => "superseded",
            Self::ContentModified => "content_modified",
        }
    }

    /// Events worth an interruptive notification.
    pub fn is_high_priority(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Accepted | Self::Rejected | Self::Withdrawn
        )
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown event type: {0}")]
pub struct EventTypeParseError(pub String);

impl FromStr for EventType {
    type Err = EventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == normalized)
            .ok_or_else(|| EventTypeParseError(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedEvent {
    pub event_type: EventType,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub metadata: Map<String, Value>,
}

/// Decide what happened to a proposal between its previous and current parse.
pub fn classify(old: Option<&ProposalData>, new: &ProposalData) -> DetectedEvent {
    classify_status(old.map(|data| data.status.as_str()), new)
}

/// Same rules as [`classify`], keyed only on the previously known status.
pub fn classify_status(old_status: Option<&str>, new: &ProposalData) -> DetectedEvent {
    let Some(old_status) = old_status else {
        return DetectedEvent {
            event_type: EventType::Created,
            old_status: None,
            new_status: Some(new.status.clone()),
            metadata: Map::new(),
        };
    };

    let event_type = if old_status.trim() != new.status.trim() {
        status_event_type(&new.status)
    } else {
        EventType::ContentModified
    };

    DetectedEvent {
        event_type,
        old_status: Some(old_status.to_string()),
        new_status: Some(new.status.clone()),
        metadata: Map::new(),
    }
}

/// Refine a status transition by its target status.
pub fn status_event_type(new_status: &str) -> EventType {
    match new_status.trim().to_lowercase().as_str() {
        "accepted" | "final" | "active" | "living" => EventType::Accepted,
        "rejected" => EventType::Rejected,
        "withdrawn" | "abandoned" => EventType::Withdrawn,
        "postponed" | "deferred" => EventType::Postponed,
        "resurrected" => EventType::Resurrected,
        "superseded" => EventType::Superseded,
        _ => EventType::StatusChanged,
    }
}

pub const WITHDRAWN_STATUS: &str = "Withdrawn";

#[derive(Debug, Clone, PartialEq)]
pub struct DeletionOutcome {
    pub event: DetectedEvent,
    /// Status to persist on the snapshot, when the deletion implies one.
    pub new_snapshot_status: Option<String>,
}

/// Interpret the removal of a tracked proposal file.
///
/// Unfinished proposals (`draft`, `deferred`, `proposed`) are treated as
/// withdrawn. Anything else is reported as a content change flagged with
/// `deleted: true`, leaving the status alone.
pub fn classify_deletion(snapshot_status: &str) -> DeletionOutcome {
    let mut metadata = Map::new();
    metadata.insert("deleted".to_string(), Value::Bool(true));

    let normalized = snapshot_status.trim().to_lowercase();
    if matches!(normalized.as_str(), "draft" | "deferred" | "proposed") {
        return DeletionOutcome {
            event: DetectedEvent {
                event_type: EventType::Withdrawn,
                old_status: Some(snapshot_status.to_string()),
                new_status: Some(WITHDRAWN_STATUS.to_string()),
                metadata,
            },
            new_snapshot_status: Some(WITHDRAWN_STATUS.to_string()),
        };
    }

    let status = (!snapshot_status.is_empty()).then(|| snapshot_status.to_string());
    DeletionOutcome {
        event: DetectedEvent {
            event_type: EventType::ContentModified,
            old_status: status.clone(),
            new_status: status,
            metadata,
        },
        new_snapshot_status: None,
    }
}

/// Headings touched by a unified diff: added lines starting with `#`,
/// deduplicated in first-seen order.
pub fn extract_changed_sections(diff_text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    for line in diff_text.lines() {
        let Some(added) = line.strip_prefix('+') else {
            continue;
        };
        let content = added.trim();
        if !content.starts_with('#') {
            continue;
        }
        let heading = content.trim_start_matches('#').trim().to_string();
        if !sections.contains(&heading) {
            sections.push(heading);
        }
    }
    sections.truncate(MAX_CHANGED_SECTIONS);
    sections
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::str::FromStr;

    use super::*;

    fn proposal(status: &str, text: &str) -> ProposalData {
        ProposalData {
            number: 42,
            title: "Example".to_string(),
            status: status.to_string(),
            proposal_type: None,
            author: None,
            created_date: None,
            file_path: "EIPS/eip-42.md".to_string(),
            full_text: text.to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn absent_old_is_created() {
        let event = classify(None, &proposal("Draft", "a"));
        assert_eq!(event.event_type, EventType::Created);
        assert_eq!(event.old_status, None);
        assert_eq!(event.new_status.as_deref(), Some("Draft"));
    }

    #[test]
    fn status_table_maps_every_entry() {
        let table = [
            ("accepted", EventType::Accepted),
            ("final", EventType::Accepted),
            ("active", EventType::Accepted),
            ("living", EventType::Accepted),
            ("rejected", EventType::Rejected),
            ("withdrawn", EventType::Withdrawn),
            ("abandoned", EventType::Withdrawn),
            ("postponed", EventType::Postponed),
            ("deferred", EventType::Postponed),
            ("resurrected", EventType::Resurrected),
            ("superseded", EventType::Superseded),
        ];
        let old = proposal("x", "body");
        for (status, expected) in table {
            let event = classify(Some(&old), &proposal(status, "body"));
            assert_eq!(event.event_type, expected, "status {status}");
            let capitalized = format!(" {}{} ", status[..1].to_uppercase(), &status[1..]);
            let event = classify(Some(&old), &proposal(&capitalized, "body"));
            assert_eq!(event.event_type, expected, "status {capitalized:?}");
        }
    }

    #[test]
    fn unmapped_status_change_is_generic() {
        let old = proposal("Draft", "body");
        for status in ["Review", "Last Call", "Stagnant", "Provisional"] {
            let event = classify(Some(&old), &proposal(status, "body"));
            assert_eq!(event.event_type, EventType::StatusChanged, "status {status}");
        }
    }

    #[test]
    fn unchanged_status_is_content_modified_even_with_whitespace() {
        let old = proposal("Draft", "body");
        let event = classify(Some(&old), &proposal(" Draft ", "new body"));
        assert_eq!(event.event_type, EventType::ContentModified);
        assert_eq!(event.old_status.as_deref(), Some("Draft"));
    }

    #[test]
    fn classify_is_idempotent() {
        let old = proposal("Draft", "body");
        let new = proposal("Final", "body");
        let first = classify(Some(&old), &new);
        for _ in 0..3 {
            assert_eq!(classify(Some(&old), &new), first);
        }
    }

    #[test]
    fn draft_deletion_is_withdrawal() {
        let outcome = classify_deletion("Draft");
        assert_eq!(outcome.event.event_type, EventType::Withdrawn);
        assert_eq!(outcome.new_snapshot_status.as_deref(), Some("Withdrawn"));
        assert_eq!(outcome.event.old_status.as_deref(), Some("Draft"));
        assert_eq!(outcome.event.metadata.get("deleted"), Some(&Value::Bool(true)));
        assert_eq!(classify_deletion("PROPOSED").event.event_type, EventType::Withdrawn);
    }

    #[test]
    fn final_deletion_keeps_status() {
        let outcome = classify_deletion("Final");
        assert_eq!(outcome.event.event_type, EventType::ContentModified);
        assert_eq!(outcome.new_snapshot_status, None);
        assert_eq!(outcome.event.new_status.as_deref(), Some("Final"));
        assert_eq!(outcome.event.metadata.get("deleted"), Some(&Value::Bool(true)));
    }

    #[test]
    fn extracts_added_headings_only() {
        let diff = "--- a/x.md\n+++ b/x.md\n@@ -1,3 +1,4 @@\n+## Motivation\n-## Old\n+ ### Rationale \n+## Motivation\n+text\n";
        assert_eq!(
            extract_changed_sections(diff),
            vec!["Motivation".to_string(), "Rationale".to_string()]
        );
    }

    #[test]
    fn changed_sections_are_capped() {
        let diff: String = (0..30).map(|i| format!("+# Section {i}\n")).collect();
        let sections = extract_changed_sections(&diff);
        assert_eq!(sections.len(), 20);
        assert_eq!(sections[0], "Section 0");
    }

    #[test]
    fn priority_and_parsing_of_event_types() {
        let high: Vec<EventType> = EventType::ALL
            .into_iter()
            .filter(EventType::is_high_priority)
            .collect();
        assert_eq!(
            high,
            vec![
                EventType::Created,
                EventType::Accepted,
                EventType::Rejected,
                EventType::Withdrawn
            ]
        );
        assert_eq!(
            EventType::from_str("content_modified").ok(),
            Some(EventType::ContentModified)
        );
        assert!(EventType::from_str("merged").is_err());
    }
}
