use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TrackerConfig;
use crate::snapshot::{SnapshotStore, TrackerKey};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub total: usize,
}

/// Make the stored tracker rows match the configured list: insert new
/// identities, flip `enabled` where it changed, drop rows no longer listed.
/// Cursors of surviving rows are kept.
pub fn sync_trackers(store: &SnapshotStore, desired: &[TrackerConfig]) -> Result<SyncSummary> {
    let mut wanted: BTreeMap<TrackerKey, bool> = BTreeMap::new();
    for tracker in desired {
        wanted.insert(tracker.key(), tracker.enabled);
    }

    let mut summary = SyncSummary::default();
    for existing in store.list_trackers()? {
        match wanted.get(&existing.key()) {
            None => {
                info!("removing tracker {}", existing.display_key());
                store.delete_tracker(existing.id)?;
                summary.deleted += 1;
            }
            Some(enabled) if *enabled != existing.enabled => {
                store.set_tracker_enabled(existing.id, *enabled)?;
                summary.updated += 1;
            }
            Some(_) => {}
        }
    }

    for (key, enabled) in &wanted {
        if store.find_tracker(key)?.is_none() {
            let tracker = store.insert_tracker(key, *enabled)?;
            info!("added tracker {}", tracker.display_key());
            summary.created += 1;
        }
    }

    summary.total = store.list_trackers()?.len();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::proposal::TrackerType;

    fn tracker(tracker_type: TrackerType, repo: &str, enabled: bool) -> TrackerConfig {
        TrackerConfig {
            tracker_type,
            repo_url: format!("https://github.com/{repo}"),
            branch: "main".to_string(),
            enabled,
            proposal_dir: String::new(),
            file_pattern: String::new(),
        }
    }

    #[test]
    fn reconciles_create_update_delete() {
        let store = SnapshotStore::open_in_memory().expect("store");
        let initial = vec![
            tracker(TrackerType::Eip, "ethereum/EIPs", true),
            tracker(TrackerType::Pep, "python/peps", true),
        ];
        let summary = sync_trackers(&store, &initial).expect("first sync");
        assert_eq!(
            summary,
            SyncSummary {
                created: 2,
                updated: 0,
                deleted: 0,
                total: 2
            }
        );

        let pep = store
            .find_tracker(&initial[1].key())
            .expect("find")
            .expect("pep tracker exists");
        store
            .advance_cursor(pep.id, "abc", Utc::now())
            .expect("advance");

        let next = vec![
            tracker(TrackerType::Pep, "python/peps", false),
            tracker(TrackerType::RustRfc, "rust-lang/rfcs", true),
        ];
        let summary = sync_trackers(&store, &next).expect("second sync");
        assert_eq!(
            summary,
            SyncSummary {
                created: 1,
                updated: 1,
                deleted: 1,
                total: 2
            }
        );

        let pep = store
            .find_tracker(&next[0].key())
            .expect("find")
            .expect("pep tracker kept");
        assert!(!pep.enabled);
        assert_eq!(pep.last_seen_commit.as_deref(), Some("abc"));
    }

    #[test]
    fn repeated_sync_is_a_no_op() {
        let store = SnapshotStore::open_in_memory().expect("store");
        let desired = vec![tracker(TrackerType::DjangoDep, "django/deps", true)];
        sync_trackers(&store, &desired).expect("first sync");
        let summary = sync_trackers(&store, &desired).expect("second sync");
        assert_eq!(
            summary,
            SyncSummary {
                created: 0,
                updated: 0,
                deleted: 0,
                total: 1
            }
        );
    }
}
