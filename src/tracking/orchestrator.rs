use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::analyzer::{Analysis, AnalysisInput, AnalysisRequest, Analyzer};
use crate::classifier::{self, DetectedEvent, EventType};
use crate::git::{self, ChangeStatus, FileChange, GitProvider};
use crate::proposal::{ProposalData, ProposalParser, TrackerType};
use crate::snapshot::{NewEvent, ProposalRef, ProposalSnapshot, SnapshotStore, Tracker};
use crate::tracking::EventReport;

/// Outcome of a first check against a tracker with no commit cursor.
#[derive(Debug, Clone, Default)]
pub struct InitialCheckResult {
    pub reports: Vec<EventReport>,
    pub matched_files: usize,
    pub parsed_files: usize,
}

/// Drives one tracker from its stored commit cursor to the repository HEAD,
/// persisting snapshots and events on the way.
pub struct ProposalTracker {
    store: Arc<SnapshotStore>,
    git: Arc<dyn GitProvider>,
    analyzer: Arc<dyn Analyzer>,
}

impl ProposalTracker {
    pub fn new(
        store: Arc<SnapshotStore>,
        git: Arc<dyn GitProvider>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Self {
        Self {
            store,
            git,
            analyzer,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Run one check. Errors are tracker-level failures: the checkout could
    /// not be refreshed or the commit range could not be listed. The cursor is
    /// left untouched in that case.
    pub fn check(&self, tracker: &Tracker) -> Result<Vec<EventReport>> {
        if !tracker.enabled {
            return Ok(Vec::new());
        }
        let key = tracker.display_key();
        let repo = self
            .git
            .clone_or_update(tracker)
            .with_context(|| format!("failed updating checkout for {key}"))?;
        let head = self
            .git
            .current_commit(&repo)
            .with_context(|| format!("failed reading HEAD for {key}"))?;
        let parser = tracker.tracker_type.parser();

        let Some(old_commit) = tracker.last_seen_commit.as_deref() else {
            let result = self.initial_check(tracker, &parser, &repo, &head)?;
            if result.parsed_files > 0 {
                self.store.advance_cursor(tracker.id, &head, Utc::now())?;
            } else {
                self.store.touch_tracker(tracker.id, Utc::now())?;
            }
            return Ok(result.reports);
        };

        if old_commit == head {
            debug!("{key} unchanged at {head}");
            self.store.touch_tracker(tracker.id, Utc::now())?;
            return Ok(Vec::new());
        }

        let changes = self
            .git
            .changed_file_statuses(&repo, old_commit, &head)
            .with_context(|| format!("failed listing changes {old_commit}..{head} for {key}"))?;
        let changes = filter_changes(tracker, &parser, changes);
        debug!("{key}: {} proposal files changed", changes.len());

        let mut reports = Vec::new();
        for change in &changes {
            let file_reports = if change.status == ChangeStatus::Deleted {
                self.handle_deleted(tracker, &parser, &change.path, &head)?
            } else {
                self.process_file(tracker, &parser, &repo, &change.path, old_commit, &head)?
            };
            reports.extend(file_reports);
        }

        self.store.advance_cursor(tracker.id, &head, Utc::now())?;
        info!(
            "{key}: checked {} files, {} events",
            changes.len(),
            reports.len()
        );
        Ok(reports)
    }

    /// Seed snapshots for every proposal in the tree and report a single
    /// `created` event for the most recently added file, so a first run
    /// shows the pipeline working without replaying the whole history.
    pub fn initial_check(
        &self,
        tracker: &Tracker,
        parser: &ProposalParser,
        repo: &Path,
        head: &str,
    ) -> Result<InitialCheckResult> {
        let key = tracker.display_key();
        let base = match proposal_dir(tracker) {
            "" => repo.to_path_buf(),
            dir => repo.join(dir),
        };
        if !base.exists() {
            warn!(
                "initial check skipped for {key}: proposal_dir not found: {}",
                tracker.proposal_dir
            );
            return Ok(InitialCheckResult::default());
        }

        let matches = list_proposal_files(repo, &base, parser, &tracker.file_pattern);
        let now = Utc::now();
        let mut parsed: Vec<ProposalData> = Vec::new();
        for rel_path in &matches {
            match parser.parse_file(&repo.join(rel_path), rel_path) {
                Ok(data) => {
                    self.store
                        .upsert_snapshot(tracker.tracker_type, &data, head, now)?;
                    parsed.push(data);
                }
                Err(e) => warn!("skipping {rel_path} in {key}: {e}"),
            }
        }

        let mut latest: Option<(&ProposalData, Option<DateTime<FixedOffset>>)> = None;
        for data in &parsed {
            let created = self.creation_date(repo, &data.file_path);
            let newer = match &latest {
                None => true,
                Some((_, best)) => created > *best,
            };
            if newer {
                latest = Some((data, created));
            }
        }

        let mut reports = Vec::new();
        if let Some((data, _)) = latest {
            let mut metadata = Map::new();
            metadata.insert("file_path".to_string(), Value::String(data.file_path.clone()));
            metadata.insert("initial_check".to_string(), Value::Bool(true));
            let event = DetectedEvent {
                event_type: EventType::Created,
                old_status: None,
                new_status: Some(data.status.clone()),
                metadata,
            };
            let analysis = self.analyze(
                tracker.tracker_type,
                &event,
                data,
                AnalysisInput::ProposalText(data.full_text.clone()),
            );
            let snapshot = self.save_analysis(tracker.tracker_type, data, &analysis)?;
            reports.push(self.record(tracker, &snapshot, &event, &data.file_path, head)?);
        }

        info!(
            "initial check for {key}: matched={} parsed={} example={}",
            matches.len(),
            parsed.len(),
            latest
                .map(|(data, _)| data.file_path.as_str())
                .unwrap_or("-")
        );
        Ok(InitialCheckResult {
            reports,
            matched_files: matches.len(),
            parsed_files: parsed.len(),
        })
    }

    fn process_file(
        &self,
        tracker: &Tracker,
        parser: &ProposalParser,
        repo: &Path,
        rel_path: &str,
        old_commit: &str,
        head: &str,
    ) -> Result<Vec<EventReport>> {
        let data = match parser.parse_file(&repo.join(rel_path), rel_path) {
            Ok(data) => data,
            Err(e) => {
                warn!("failed to parse {rel_path} for {}: {e}", tracker.display_key());
                let mut metadata = Map::new();
                metadata.insert("error".to_string(), Value::String(e.to_string()));
                metadata.insert("file_path".to_string(), Value::String(rel_path.to_string()));
                self.store.insert_event(&NewEvent {
                    proposal_ref: None,
                    event_type: EventType::ContentModified,
                    old_status: None,
                    new_status: None,
                    commit_hash: head.to_string(),
                    metadata,
                })?;
                return Ok(Vec::new());
            }
        };

        let existing = self.store.get_snapshot(tracker.tracker_type, data.number)?;
        let mut event =
            classifier::classify_status(existing.as_ref().map(|s| s.status.as_str()), &data);
        event
            .metadata
            .insert("file_path".to_string(), Value::String(rel_path.to_string()));

        let input = if event.event_type == EventType::ContentModified {
            let diff = match self.git.file_diff(repo, old_commit, head, rel_path) {
                Ok(diff) => diff,
                Err(e) => {
                    warn!("failed reading diff of {rel_path}: {e}");
                    String::new()
                }
            };
            let sections = classifier::extract_changed_sections(&diff);
            event.metadata.insert(
                "changed_sections".to_string(),
                Value::Array(sections.into_iter().map(Value::String).collect()),
            );
            AnalysisInput::DiffText(diff)
        } else {
            AnalysisInput::ProposalText(data.full_text.clone())
        };

        let analysis = self.analyze(tracker.tracker_type, &event, &data, input);
        self.store
            .upsert_snapshot(tracker.tracker_type, &data, head, Utc::now())?;
        let snapshot = self.save_analysis(tracker.tracker_type, &data, &analysis)?;
        Ok(vec![self.record(tracker, &snapshot, &event, rel_path, head)?])
    }

    fn handle_deleted(
        &self,
        tracker: &Tracker,
        parser: &ProposalParser,
        rel_path: &str,
        head: &str,
    ) -> Result<Vec<EventReport>> {
        let Ok(number) = parser.proposal_number(rel_path) else {
            debug!("ignoring deleted file without a proposal number: {rel_path}");
            return Ok(Vec::new());
        };
        let Some(mut snapshot) = self.store.get_snapshot(tracker.tracker_type, number)? else {
            return Ok(Vec::new());
        };

        let mut outcome = classifier::classify_deletion(&snapshot.status);
        if let Some(status) = &outcome.new_snapshot_status {
            self.store
                .set_snapshot_status(tracker.tracker_type, number, status)?;
            snapshot.status = status.clone();
        }
        outcome
            .event
            .metadata
            .insert("file_path".to_string(), Value::String(rel_path.to_string()));
        Ok(vec![self.record(tracker, &snapshot, &outcome.event, rel_path, head)?])
    }

    /// Append the event and build its report from the stored snapshot.
    fn record(
        &self,
        tracker: &Tracker,
        snapshot: &ProposalSnapshot,
        event: &DetectedEvent,
        rel_path: &str,
        head: &str,
    ) -> Result<EventReport> {
        let stored = self.store.insert_event(&NewEvent {
            proposal_ref: Some(ProposalRef {
                tracker_type: snapshot.tracker_type,
                number: snapshot.number,
            }),
            event_type: event.event_type,
            old_status: event.old_status.clone(),
            new_status: event.new_status.clone(),
            commit_hash: head.to_string(),
            metadata: event.metadata.clone(),
        })?;
        Ok(EventReport {
            tracker_type: snapshot.tracker_type,
            proposal_number: snapshot.number,
            title: snapshot.title.clone(),
            event_type: stored.event_type,
            old_status: stored.old_status,
            new_status: stored.new_status,
            commit_hash: stored.commit_hash,
            detected_at: stored.detected_at,
            analysis_summary: snapshot.analysis_summary.clone().unwrap_or_default(),
            analysis_detail: snapshot.analysis_detail.clone().unwrap_or_default(),
            file_path: rel_path.to_string(),
            file_url: file_url(&tracker.repo_url, tracker.tracker_type, head, rel_path),
        })
    }

    /// Store a complete analysis on the snapshot and return the snapshot as
    /// it now reads.
    fn save_analysis(
        &self,
        tracker_type: TrackerType,
        data: &ProposalData,
        analysis: &Analysis,
    ) -> Result<ProposalSnapshot> {
        if analysis.is_complete() {
            self.store.set_snapshot_analysis(
                tracker_type,
                data.number,
                &analysis.summary,
                &analysis.detail,
            )?;
        }
        self.store
            .get_snapshot(tracker_type, data.number)?
            .with_context(|| format!("{tracker_type} {} has no snapshot", data.number))
    }

    fn analyze(
        &self,
        tracker_type: TrackerType,
        event: &DetectedEvent,
        data: &ProposalData,
        input: AnalysisInput,
    ) -> Analysis {
        let request = AnalysisRequest {
            tracker_type,
            event_type: event.event_type,
            number: data.number,
            title: data.title.clone(),
            old_status: event.old_status.clone(),
            new_status: event.new_status.clone(),
            input,
        };
        match self.analyzer.analyze(&request) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("analysis of {tracker_type} {} failed: {e}", data.number);
                Analysis::default()
            }
        }
    }

    fn creation_date(&self, repo: &Path, rel_path: &str) -> Option<DateTime<FixedOffset>> {
        match self.git.file_creation_date(repo, rel_path) {
            Ok(raw) => raw.as_deref().and_then(git::parse_creation_date),
            Err(e) => {
                warn!("failed reading creation date of {rel_path}: {e}");
                None
            }
        }
    }
}

/// Proposal directory relative to the checkout root.
fn proposal_dir(tracker: &Tracker) -> &str {
    tracker.proposal_dir.trim_matches('/')
}

/// Keep changes under the tracker's proposal directory whose file name
/// matches its pattern. Empty directory or pattern means no restriction.
fn filter_changes(
    tracker: &Tracker,
    parser: &ProposalParser,
    changes: Vec<FileChange>,
) -> Vec<FileChange> {
    let prefix = match proposal_dir(tracker) {
        "" => None,
        dir => Some(format!("{dir}/")),
    };
    changes
        .into_iter()
        .filter(|change| {
            prefix
                .as_deref()
                .map_or(true, |prefix| change.path.starts_with(prefix))
        })
        .filter(|change| {
            tracker.file_pattern.is_empty()
                || parser.matches_pattern(&change.path, &tracker.file_pattern)
        })
        .collect()
}

/// Repository-relative, `/`-separated paths of matching files under `base`,
/// in file-name order. The `.git` directory is never entered.
fn list_proposal_files(
    repo: &Path,
    base: &Path,
    parser: &ProposalParser,
    pattern: &str,
) -> Vec<String> {
    WalkDir::new(base)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let rel = entry.path().strip_prefix(repo).ok()?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            Some(rel)
        })
        .filter(|rel| pattern.is_empty() || parser.matches_pattern(rel, pattern))
        .collect()
}

/// GitHub blob link for a file at a commit. Non-GitHub remotes fall back to
/// the tracker type's upstream repository.
pub fn file_url(repo_url: &str, tracker_type: TrackerType, commit: &str, rel_path: &str) -> String {
    git::github_slug(repo_url)
        .or_else(|| git::github_slug(tracker_type.default_repo_url()))
        .map(|slug| format!("https://github.com/{slug}/blob/{commit}/{rel_path}"))
        .unwrap_or_default()
}
