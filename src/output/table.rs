use std::collections::BTreeMap;

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::snapshot::{ProposalEvent, Tracker};
use crate::tracking::{EventReport, TrackerStatus};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn status_transition(old: Option<&str>, new: Option<&str>) -> String {
    format!("{} -> {}", old.unwrap_or("-"), new.unwrap_or("-"))
}

pub fn render_events_table(events: &[EventReport]) -> String {
    let mut table = new_table();
    table.set_header(vec!["Type", "Number", "Title", "Event", "Status", "Summary"]);

    for e in events {
        let event_cell = if e.event_type.is_high_priority() {
            Cell::new(e.event_type.as_str()).fg(Color::Yellow)
        } else {
            Cell::new(e.event_type.as_str())
        };
        table.add_row(Row::from(vec![
            Cell::new(e.tracker_type.to_string()),
            Cell::new(e.proposal_number.to_string()),
            Cell::new(&e.title),
            event_cell,
            Cell::new(status_transition(
                e.old_status.as_deref(),
                e.new_status.as_deref(),
            )),
            Cell::new(if e.analysis_summary.is_empty() {
                "-"
            } else {
                e.analysis_summary.as_str()
            }),
        ]));
    }
    table.to_string()
}

pub fn render_status_table(statuses: &BTreeMap<String, TrackerStatus>) -> String {
    let mut table = new_table();
    table.set_header(vec!["Tracker", "Status"]);
    for (key, status) in statuses {
        let color = match status {
            TrackerStatus::Success => Color::Green,
            TrackerStatus::Failed => Color::Red,
            TrackerStatus::Skipped => Color::DarkGrey,
        };
        table.add_row(Row::from(vec![
            Cell::new(key),
            Cell::new(status.as_str()).fg(color),
        ]));
    }
    table.to_string()
}

pub fn render_trackers_table(trackers: &[Tracker]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "ID",
        "Type",
        "Repository",
        "Branch",
        "Dir",
        "Pattern",
        "Enabled",
        "Last Commit",
        "Last Check",
    ]);
    for t in trackers {
        table.add_row(vec![
            t.id.to_string(),
            t.tracker_type.as_slug().to_string(),
            t.repo_url.clone(),
            t.branch.clone(),
            t.proposal_dir.clone(),
            t.file_pattern.clone(),
            t.enabled.to_string(),
            t.last_seen_commit
                .as_deref()
                .map(|c| c.chars().take(10).collect())
                .unwrap_or_else(|| "-".to_string()),
            t.last_check_time
                .map(|v| v.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    table.to_string()
}

pub fn render_stored_events_table(events: &[ProposalEvent]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "ID",
        "Detected At",
        "Proposal",
        "Event",
        "Status",
        "Commit",
    ]);
    for e in events {
        let proposal = match e.proposal_ref {
            Some(r) => format!("{} {}", r.tracker_type, r.number),
            None => e
                .metadata
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(|path| format!("(unparsed) {path}"))
                .unwrap_or_else(|| "-".to_string()),
        };
        table.add_row(vec![
            e.id.to_string(),
            e.detected_at.to_rfc3339(),
            proposal,
            e.event_type.to_string(),
            status_transition(e.old_status.as_deref(), e.new_status.as_deref()),
            e.commit_hash.chars().take(10).collect(),
        ]);
    }
    table.to_string()
}
