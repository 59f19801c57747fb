use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::proposal::TrackerType;
use crate::tracking::EventReport;

/// Events of one run grouped by tracker type, with a markdown rendering for
/// notification channels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalReport {
    pub title: String,
    pub body: String,
    pub total_events: usize,
    pub high_priority_count: usize,
    pub by_tracker_type: BTreeMap<TrackerType, Vec<EventReport>>,
}

pub fn filter_high_priority(events: &[EventReport]) -> Vec<EventReport> {
    events
        .iter()
        .filter(|event| event.event_type.is_high_priority())
        .cloned()
        .collect()
}

/// Group events by tracker type, keeping each group in detection order.
/// Returns `None` when there is nothing to report.
pub fn aggregate(events: &[EventReport]) -> Option<ProposalReport> {
    if events.is_empty() {
        return None;
    }

    let mut by_tracker_type: BTreeMap<TrackerType, Vec<EventReport>> = BTreeMap::new();
    for event in events {
        by_tracker_type
            .entry(event.tracker_type)
            .or_default()
            .push(event.clone());
    }
    let high_priority_count = events
        .iter()
        .filter(|event| event.event_type.is_high_priority())
        .count();

    let title = format!(
        "Proposal updates: {} event{} ({} high priority)",
        events.len(),
        if events.len() == 1 { "" } else { "s" },
        high_priority_count
    );
    let body = render_body(&by_tracker_type);

    Some(ProposalReport {
        title,
        body,
        total_events: events.len(),
        high_priority_count,
        by_tracker_type,
    })
}

fn render_body(groups: &BTreeMap<TrackerType, Vec<EventReport>>) -> String {
    let mut body = String::new();
    for (tracker_type, events) in groups {
        let _ = writeln!(body, "## {tracker_type}\n");
        for event in events {
            let transition = match (&event.old_status, &event.new_status) {
                (Some(old), Some(new)) if old != new => format!(" ({old} -> {new})"),
                (None, Some(new)) => format!(" ({new})"),
                _ => String::new(),
            };
            let label = if event.file_url.is_empty() {
                format!("{tracker_type} {}: {}", event.proposal_number, event.title)
            } else {
                format!(
                    "[{tracker_type} {}: {}]({})",
                    event.proposal_number, event.title, event.file_url
                )
            };
            let _ = writeln!(body, "- **{}** {label}{transition}", event.event_type);
            if !event.analysis_summary.is_empty() {
                let _ = writeln!(body, "  {}", event.analysis_summary);
            }
        }
        body.push('\n');
    }
    body.trim_end().to_string()
}
