use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::snapshot::Tracker;
use crate::tracking::{CheckAllResult, EventReport, ProposalTracker, TrackerStatus};

/// Check every tracker, at most `concurrency` at a time.
///
/// A failing or panicking tracker is logged and recorded as `failed`; it
/// never stops the others. Disabled trackers are recorded as `skipped`.
/// Results come back in input order, each tracker's events kept together.
pub async fn check_all(
    orchestrator: Arc<ProposalTracker>,
    trackers: Vec<Tracker>,
    concurrency: usize,
) -> CheckAllResult {
    let mut result = CheckAllResult::default();
    let mut outcomes: Vec<Option<Vec<EventReport>>> = vec![None; trackers.len()];
    let keys: Vec<String> = trackers.iter().map(Tracker::display_key).collect();
    let enabled: Vec<bool> = trackers.iter().map(|t| t.enabled).collect();

    if concurrency <= 1 {
        for (idx, tracker) in trackers.into_iter().enumerate() {
            if !tracker.enabled {
                continue;
            }
            outcomes[idx] = run_one(orchestrator.clone(), tracker).await;
        }
    } else {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut jobs = JoinSet::new();
        for (idx, tracker) in trackers.into_iter().enumerate() {
            if !tracker.enabled {
                continue;
            }
            let orchestrator = orchestrator.clone();
            let semaphore = semaphore.clone();
            jobs.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (idx, run_one(orchestrator, tracker).await)
            });
        }
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = outcome,
                Err(e) => warn!("tracker job aborted: {e}"),
            }
        }
    }

    for (idx, key) in keys.into_iter().enumerate() {
        let status = if !enabled[idx] {
            TrackerStatus::Skipped
        } else if let Some(events) = outcomes[idx].take() {
            result.events.extend(events);
            TrackerStatus::Success
        } else {
            TrackerStatus::Failed
        };
        // trackers differing only in directory or pattern share a key
        result
            .tracker_statuses
            .entry(key)
            .and_modify(|current| *current = current.worst(status))
            .or_insert(status);
    }

    let (success, failed, skipped) = result.status_counts();
    info!(
        "checked {} trackers: {success} succeeded, {failed} failed, {skipped} skipped, {} events",
        result.tracker_statuses.len(),
        result.events.len()
    );
    result
}

/// Run one blocking check off the async workers. `None` means it failed.
async fn run_one(orchestrator: Arc<ProposalTracker>, tracker: Tracker) -> Option<Vec<EventReport>> {
    let key = tracker.display_key();
    match tokio::task::spawn_blocking(move || orchestrator.check(&tracker)).await {
        Ok(Ok(events)) => Some(events),
        Ok(Err(e)) => {
            warn!("tracker {key} failed: {e:#}");
            None
        }
        Err(e) => {
            warn!("tracker {key} panicked: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::analyzer::NoopAnalyzer;
    use crate::proposal::TrackerType;
    use crate::snapshot::{SnapshotStore, TrackerKey};
    use crate::tracking::testing::{write_file, FakeGit};

    fn setup(count: usize) -> (tempfile::TempDir, Arc<FakeGit>, Arc<ProposalTracker>, Vec<Tracker>) {
        let dir = tempfile::tempdir().expect("temp dir");
        write_file(
            dir.path(),
            "peps/pep-0001.rst",
            "PEP: 1\nTitle: Purpose and Guidelines\nStatus: Active\nType: Process\n\nBody\n",
        );
        let git = Arc::new(FakeGit::new(dir.path()));
        let store = Arc::new(SnapshotStore::open_in_memory().expect("store"));
        let mut trackers = Vec::new();
        for i in 1..=count {
            trackers.push(
                store
                    .insert_tracker(
                        &TrackerKey {
                            tracker_type: TrackerType::Pep,
                            repo_url: format!("https://github.com/example/repo{i}"),
                            branch: "main".to_string(),
                            proposal_dir: "peps".to_string(),
                            file_pattern: "pep-*.rst".to_string(),
                        },
                        true,
                    )
                    .expect("insert tracker"),
            );
        }
        let orchestrator = Arc::new(ProposalTracker::new(
            store,
            git.clone(),
            Arc::new(NoopAnalyzer),
        ));
        (dir, git, orchestrator, trackers)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_failing_clone_does_not_affect_the_rest() {
        let (_dir, git, orchestrator, mut trackers) = setup(5);
        git.fail_clone_for("https://github.com/example/repo3");
        git.set_clone_delay(Duration::from_millis(50));
        trackers[4].enabled = false;
        let failing_key = trackers[2].display_key();
        let skipped_key = trackers[4].display_key();

        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            check_all(orchestrator, trackers, 2),
        )
        .await
        .expect("runner finishes in bounded time");

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(result.tracker_statuses.len(), 5);
        assert_eq!(result.tracker_statuses[&failing_key], TrackerStatus::Failed);
        assert_eq!(result.tracker_statuses[&skipped_key], TrackerStatus::Skipped);
        assert_eq!(result.status_counts(), (3, 1, 1));
        assert_eq!(git.clone_calls(), 4);
    }

    #[tokio::test]
    async fn sequential_mode_keeps_input_order() {
        let (_dir, git, orchestrator, trackers) = setup(3);
        git.fail_clone_for("https://github.com/example/repo2");

        let result = check_all(orchestrator, trackers.clone(), 1).await;

        assert_eq!(result.status_counts(), (2, 1, 0));
        // every tracker bootstraps onto the same PEP, one created event each
        assert_eq!(result.events.len(), 2);
        assert!(result
            .events
            .iter()
            .all(|event| event.proposal_number == 1));
    }

    #[tokio::test]
    async fn failure_is_not_hidden_by_a_tracker_with_the_same_key() {
        let (_dir, git, orchestrator, mut trackers) = setup(2);
        trackers[1].repo_url = trackers[0].repo_url.clone();
        trackers[1].file_pattern = "pep-000*.rst".to_string();
        git.fail_next_clones(1);
        let key = trackers[0].display_key();

        let result = check_all(orchestrator, trackers, 1).await;

        assert_eq!(result.tracker_statuses.len(), 1);
        assert_eq!(result.tracker_statuses[&key], TrackerStatus::Failed);
    }

    #[tokio::test]
    async fn empty_input_yields_empty_result() {
        let (_dir, _git, orchestrator, _) = setup(0);
        let result = check_all(orchestrator, Vec::new(), 4).await;
        assert!(result.events.is_empty());
        assert!(result.tracker_statuses.is_empty());
    }
}
