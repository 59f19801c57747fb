pub const BASE_MIGRATION: &str = r#"
CREATE TABLE IF NOT EXISTS proposal_trackers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tracker_type TEXT NOT NULL,
    repo_url TEXT NOT NULL,
    branch TEXT NOT NULL DEFAULT 'main',
    enabled INTEGER NOT NULL DEFAULT 1,
    proposal_dir TEXT NOT NULL DEFAULT '',
    file_pattern TEXT NOT NULL DEFAULT '',
    last_seen_commit TEXT,
    last_check_time TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_trackers_identity
    ON proposal_trackers(tracker_type, repo_url, branch, proposal_dir, file_pattern);

CREATE TABLE IF NOT EXISTS proposals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tracker_type TEXT NOT NULL,
    number INTEGER NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL,
    proposal_type TEXT,
    author TEXT,
    created_date TEXT,
    file_path TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    extra_json TEXT NOT NULL DEFAULT '{}',
    last_seen_commit TEXT,
    last_check_time TEXT,
    analysis_summary TEXT,
    analysis_detail TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_proposals_identity
    ON proposals(tracker_type, number);

CREATE TABLE IF NOT EXISTS proposal_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tracker_type TEXT,
    proposal_number INTEGER,
    event_type TEXT NOT NULL,
    old_status TEXT,
    new_status TEXT,
    commit_hash TEXT NOT NULL,
    detected_at TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_events_proposal
    ON proposal_events(tracker_type, proposal_number, id DESC);
"#;
