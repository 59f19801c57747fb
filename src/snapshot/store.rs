use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::classifier::EventType;
use crate::proposal::{ProposalData, TrackerType};
use crate::snapshot::migrations::BASE_MIGRATION;
use crate::snapshot::{
    NewEvent, ProposalEvent, ProposalRef, ProposalSnapshot, Tracker, TrackerKey,
};

const NAIVE_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const TRACKER_COLUMNS: &str = "id, tracker_type, repo_url, branch, enabled, proposal_dir, \
     file_pattern, last_seen_commit, last_check_time, created_at, updated_at";

const SNAPSHOT_COLUMNS: &str = "tracker_type, number, title, status, proposal_type, author, \
     created_date, file_path, content_hash, extra_json, last_seen_commit, last_check_time, \
     analysis_summary, analysis_detail, created_at, updated_at";

const EVENT_COLUMNS: &str = "id, tracker_type, proposal_number, event_type, old_status, \
     new_status, commit_hash, detected_at, metadata_json";

/// SQLite-backed state for trackers, proposal snapshots and the event log.
///
/// The connection sits behind a mutex so tracker checks running on separate
/// worker threads can share one store; every statement commits on its own.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed creating store directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed opening store: {}", path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn().execute_batch(BASE_MIGRATION)?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("snapshot store mutex poisoned")
    }

    pub fn list_trackers(&self) -> Result<Vec<Tracker>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {TRACKER_COLUMNS} FROM proposal_trackers ORDER BY id"))?;
        let rows = stmt
            .query_map([], row_to_tracker)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_enabled_trackers(&self) -> Result<Vec<Tracker>> {
        Ok(self
            .list_trackers()?
            .into_iter()
            .filter(|t| t.enabled)
            .collect())
    }

    pub fn get_tracker(&self, id: i64) -> Result<Option<Tracker>> {
        let conn = self.conn();
        let tracker = conn
            .query_row(
                &format!("SELECT {TRACKER_COLUMNS} FROM proposal_trackers WHERE id = ?1"),
                params![id],
                row_to_tracker,
            )
            .optional()?;
        Ok(tracker)
    }

    pub fn find_tracker(&self, key: &TrackerKey) -> Result<Option<Tracker>> {
        let conn = self.conn();
        let tracker = conn
            .query_row(
                &format!(
                    "SELECT {TRACKER_COLUMNS} FROM proposal_trackers
                     WHERE tracker_type = ?1 AND repo_url = ?2 AND branch = ?3
                       AND proposal_dir = ?4 AND file_pattern = ?5"
                ),
                params![
                    key.tracker_type.as_slug(),
                    key.repo_url,
                    key.branch,
                    key.proposal_dir,
                    key.file_pattern
                ],
                row_to_tracker,
            )
            .optional()?;
        Ok(tracker)
    }

    pub fn insert_tracker(&self, key: &TrackerKey, enabled: bool) -> Result<Tracker> {
        let now = Utc::now();
        let id = {
            let conn = self.conn();
            conn.execute(
                r#"
INSERT INTO proposal_trackers(
    tracker_type, repo_url, branch, enabled, proposal_dir, file_pattern, created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
"#,
                params![
                    key.tracker_type.as_slug(),
                    key.repo_url,
                    key.branch,
                    enabled,
                    key.proposal_dir,
                    key.file_pattern,
                    now.to_rfc3339()
                ],
            )
            .with_context(|| format!("failed inserting tracker {}", key.repo_url))?;
            conn.last_insert_rowid()
        };
        self.get_tracker(id)?
            .with_context(|| format!("tracker {id} missing after insert"))
    }

    pub fn set_tracker_enabled(&self, id: i64, enabled: bool) -> Result<()> {
        self.conn().execute(
            "UPDATE proposal_trackers SET enabled = ?1, updated_at = ?2 WHERE id = ?3",
            params![enabled, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn delete_tracker(&self, id: i64) -> Result<()> {
        self.conn()
            .execute("DELETE FROM proposal_trackers WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Move the commit cursor to `commit` and record the check time.
    pub fn advance_cursor(&self, id: i64, commit: &str, now: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            r#"
UPDATE proposal_trackers
SET last_seen_commit = ?1, last_check_time = ?2, updated_at = ?2
WHERE id = ?3
"#,
            params![commit, now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Record a check without moving the cursor.
    pub fn touch_tracker(&self, id: i64, now: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE proposal_trackers SET last_check_time = ?1, updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn get_snapshot(
        &self,
        tracker_type: TrackerType,
        number: u32,
    ) -> Result<Option<ProposalSnapshot>> {
        let conn = self.conn();
        query_snapshot(&conn, tracker_type, number)
    }

    /// Insert or refresh the snapshot for `data`. Analysis fields are left as
    /// they are.
    pub fn upsert_snapshot(
        &self,
        tracker_type: TrackerType,
        data: &ProposalData,
        commit: &str,
        now: DateTime<Utc>,
    ) -> Result<ProposalSnapshot> {
        let conn = self.conn();
        conn.execute(
            r#"
INSERT INTO proposals(
    tracker_type, number, title, status, proposal_type, author, created_date, file_path,
    content_hash, extra_json, last_seen_commit, last_check_time, created_at, updated_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12, ?12)
ON CONFLICT(tracker_type, number) DO UPDATE SET
    title = excluded.title,
    status = excluded.status,
    proposal_type = excluded.proposal_type,
    author = excluded.author,
    created_date = excluded.created_date,
    file_path = excluded.file_path,
    content_hash = excluded.content_hash,
    extra_json = excluded.extra_json,
    last_seen_commit = excluded.last_seen_commit,
    last_check_time = excluded.last_check_time,
    updated_at = excluded.updated_at
"#,
            params![
                tracker_type.as_slug(),
                i64::from(data.number),
                data.title,
                data.status,
                data.proposal_type,
                data.author,
                data.created_date
                    .map(|d| d.format(NAIVE_DATE_FORMAT).to_string()),
                data.file_path,
                data.content_hash(),
                serde_json::to_string(&data.extra)?,
                commit,
                now.to_rfc3339()
            ],
        )
        .with_context(|| format!("failed upserting {tracker_type} {}", data.number))?;
        query_snapshot(&conn, tracker_type, data.number)?
            .with_context(|| format!("{tracker_type} {} missing after upsert", data.number))
    }

    pub fn set_snapshot_status(
        &self,
        tracker_type: TrackerType,
        number: u32,
        status: &str,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE proposals SET status = ?1, updated_at = ?2 WHERE tracker_type = ?3 AND number = ?4",
            params![
                status,
                Utc::now().to_rfc3339(),
                tracker_type.as_slug(),
                i64::from(number)
            ],
        )?;
        Ok(())
    }

    pub fn set_snapshot_analysis(
        &self,
        tracker_type: TrackerType,
        number: u32,
        summary: &str,
        detail: &str,
    ) -> Result<()> {
        self.conn().execute(
            r#"
UPDATE proposals
SET analysis_summary = ?1, analysis_detail = ?2, updated_at = ?3
WHERE tracker_type = ?4 AND number = ?5
"#,
            params![
                summary,
                detail,
                Utc::now().to_rfc3339(),
                tracker_type.as_slug(),
                i64::from(number)
            ],
        )?;
        Ok(())
    }

    pub fn count_snapshots(&self, tracker_type: TrackerType) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM proposals WHERE tracker_type = ?1",
            params![tracker_type.as_slug()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn insert_event(&self, event: &NewEvent) -> Result<ProposalEvent> {
        let detected_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            r#"
INSERT INTO proposal_events(
    tracker_type, proposal_number, event_type, old_status, new_status, commit_hash,
    detected_at, metadata_json
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
"#,
            params![
                event.proposal_ref.map(|r| r.tracker_type.as_slug()),
                event.proposal_ref.map(|r| i64::from(r.number)),
                event.event_type.as_str(),
                event.old_status,
                event.new_status,
                event.commit_hash,
                detected_at.to_rfc3339(),
                serde_json::to_string(&event.metadata)?
            ],
        )
        .context("failed appending proposal event")?;
        Ok(ProposalEvent {
            id: conn.last_insert_rowid(),
            proposal_ref: event.proposal_ref,
            event_type: event.event_type,
            old_status: event.old_status.clone(),
            new_status: event.new_status.clone(),
            commit_hash: event.commit_hash.clone(),
            detected_at,
            metadata: event.metadata.clone(),
        })
    }

    /// Newest events first.
    pub fn recent_events(
        &self,
        limit: usize,
        tracker_type: Option<TrackerType>,
    ) -> Result<Vec<ProposalEvent>> {
        let conn = self.conn();
        let rows = match tracker_type {
            Some(tracker_type) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM proposal_events
                     WHERE tracker_type = ?1 ORDER BY id DESC LIMIT ?2"
                ))?;
                let rows = stmt
                    .query_map(params![tracker_type.as_slug(), limit as i64], row_to_event)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM proposal_events ORDER BY id DESC LIMIT ?1"
                ))?;
                let rows = stmt
                    .query_map(params![limit as i64], row_to_event)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Oldest events first.
    pub fn events_for_proposal(
        &self,
        tracker_type: TrackerType,
        number: u32,
    ) -> Result<Vec<ProposalEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM proposal_events
             WHERE tracker_type = ?1 AND proposal_number = ?2 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(
                params![tracker_type.as_slug(), i64::from(number)],
                row_to_event,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_events(&self) -> Result<usize> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM proposal_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn query_snapshot(
    conn: &Connection,
    tracker_type: TrackerType,
    number: u32,
) -> Result<Option<ProposalSnapshot>> {
    let snapshot = conn
        .query_row(
            &format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM proposals WHERE tracker_type = ?1 AND number = ?2"
            ),
            params![tracker_type.as_slug(), i64::from(number)],
            row_to_snapshot,
        )
        .optional()?;
    Ok(snapshot)
}

fn row_to_tracker(row: &Row<'_>) -> rusqlite::Result<Tracker> {
    Ok(Tracker {
        id: row.get(0)?,
        tracker_type: tracker_type_column(row, 1)?,
        repo_url: row.get(2)?,
        branch: row.get(3)?,
        enabled: row.get(4)?,
        proposal_dir: row.get(5)?,
        file_pattern: row.get(6)?,
        last_seen_commit: row.get(7)?,
        last_check_time: optional_timestamp_column(row, 8)?,
        created_at: timestamp_column(row, 9)?,
        updated_at: timestamp_column(row, 10)?,
    })
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<ProposalSnapshot> {
    let created_date = row
        .get::<_, Option<String>>(6)?
        .and_then(|raw| NaiveDateTime::parse_from_str(&raw, NAIVE_DATE_FORMAT).ok());
    let extra_json: String = row.get(9)?;
    let extra: BTreeMap<String, String> = serde_json::from_str(&extra_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;
    Ok(ProposalSnapshot {
        tracker_type: tracker_type_column(row, 0)?,
        number: number_column(row, 1)?,
        title: row.get(2)?,
        status: row.get(3)?,
        proposal_type: row.get(4)?,
        author: row.get(5)?,
        created_date,
        file_path: row.get(7)?,
        content_hash: row.get(8)?,
        extra,
        last_seen_commit: row.get(10)?,
        last_check_time: optional_timestamp_column(row, 11)?,
        analysis_summary: row.get(12)?,
        analysis_detail: row.get(13)?,
        created_at: timestamp_column(row, 14)?,
        updated_at: timestamp_column(row, 15)?,
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<ProposalEvent> {
    let tracker_type: Option<String> = row.get(1)?;
    let number: Option<i64> = row.get(2)?;
    let proposal_ref = match (tracker_type, number) {
        (Some(raw), Some(number)) => Some(ProposalRef {
            tracker_type: TrackerType::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?,
            number: u32::try_from(number).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, Type::Integer, Box::new(e))
            })?,
        }),
        _ => None,
    };
    let event_type_raw: String = row.get(3)?;
    let event_type = EventType::from_str(&event_type_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    let metadata_json: String = row.get(8)?;
    let metadata: Map<String, Value> = serde_json::from_str(&metadata_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    Ok(ProposalEvent {
        id: row.get(0)?,
        proposal_ref,
        event_type,
        old_status: row.get(4)?,
        new_status: row.get(5)?,
        commit_hash: row.get(6)?,
        detected_at: timestamp_column(row, 7)?,
        metadata,
    })
}

fn tracker_type_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<TrackerType> {
    let raw: String = row.get(idx)?;
    TrackerType::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn number_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(idx)?;
    u32::try_from(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(e)))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_timestamp_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp_column(row, idx).map(Some),
        None => Ok(None),
    }
}
