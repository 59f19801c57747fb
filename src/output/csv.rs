use anyhow::Result;

use crate::snapshot::ProposalEvent;
use crate::tracking::EventReport;

pub fn events_to_csv(events: &[EventReport]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "tracker_type",
        "proposal_number",
        "title",
        "event_type",
        "old_status",
        "new_status",
        "commit_hash",
        "detected_at",
        "analysis_summary",
        "file_path",
        "file_url",
    ])?;
    for e in events {
        writer.write_record([
            e.tracker_type.as_slug().to_string(),
            e.proposal_number.to_string(),
            e.title.clone(),
            e.event_type.to_string(),
            e.old_status.clone().unwrap_or_default(),
            e.new_status.clone().unwrap_or_default(),
            e.commit_hash.clone(),
            e.detected_at.to_rfc3339(),
            e.analysis_summary.clone(),
            e.file_path.clone(),
            e.file_url.clone(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn stored_events_to_csv(events: &[ProposalEvent]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "id",
        "tracker_type",
        "proposal_number",
        "event_type",
        "old_status",
        "new_status",
        "commit_hash",
        "detected_at",
        "metadata",
    ])?;
    for e in events {
        writer.write_record([
            e.id.to_string(),
            e.proposal_ref
                .map(|r| r.tracker_type.as_slug().to_string())
                .unwrap_or_default(),
            e.proposal_ref
                .map(|r| r.number.to_string())
                .unwrap_or_default(),
            e.event_type.to_string(),
            e.old_status.clone().unwrap_or_default(),
            e.new_status.clone().unwrap_or_default(),
            e.commit_hash.clone(),
            e.detected_at.to_rfc3339(),
            serde_json::to_string(&e.metadata)?,
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Map;

    use super::*;
    use crate::classifier::EventType;
    use crate::proposal::TrackerType;

    #[test]
    fn event_csv_quotes_commas_in_titles() {
        let events = vec![EventReport {
            tracker_type: TrackerType::RustRfc,
            proposal_number: 2094,
            title: "NLL, take two".to_string(),
            event_type: EventType::Created,
            old_status: None,
            new_status: Some("unknown".to_string()),
            commit_hash: "abc".to_string(),
            detected_at: Utc::now(),
            analysis_summary: String::new(),
            analysis_detail: String::new(),
            file_path: "text/2094-nll.md".to_string(),
            file_url: String::new(),
        }];
        let csv = events_to_csv(&events).expect("csv renders");
        let mut lines = csv.lines();
        assert!(lines.next().expect("header").starts_with("tracker_type,proposal_number"));
        assert!(lines
            .next()
            .expect("row")
            .starts_with("rust_rfc,2094,\"NLL, take two\",created,,unknown"));
    }

    #[test]
    fn diagnostic_events_have_empty_reference_columns() {
        let events = vec![ProposalEvent {
            id: 1,
            proposal_ref: None,
            event_type: EventType::ContentModified,
            old_status: None,
            new_status: None,
            commit_hash: "abc".to_string(),
            detected_at: Utc::now(),
            metadata: Map::new(),
        }];
        let csv = stored_events_to_csv(&events).expect("csv renders");
        assert!(csv.lines().nth(1).expect("row").starts_with("1,,,content_modified"));
    }
}
