use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::analyzer::{Analysis, AnalysisError, AnalysisRequest, Analyzer};
use crate::git::{FileChange, GitError, GitProvider};
use crate::snapshot::Tracker;

pub fn write_file(root: &Path, rel_path: &str, text: &str) {
    let path = root.join(rel_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create fixture dir");
    }
    std::fs::write(path, text).expect("write fixture");
}

/// Scripted git: every tracker shares one working tree on disk, HEAD and the
/// change list are set by the test.
pub struct FakeGit {
    pub repo: PathBuf,
    head: Mutex<String>,
    changes: Mutex<Vec<FileChange>>,
    diffs: Mutex<HashMap<String, String>>,
    creation_dates: Mutex<HashMap<String, String>>,
    failing_repos: Mutex<HashSet<String>>,
    fail_diff_listing: AtomicBool,
    clone_delay: Mutex<Duration>,
    failing_clones: AtomicUsize,
    clone_calls: AtomicUsize,
    diff_list_calls: AtomicUsize,
}

impl FakeGit {
    pub fn new(repo: &Path) -> Self {
        Self {
            repo: repo.to_path_buf(),
            head: Mutex::new("c0".to_string()),
            changes: Mutex::new(Vec::new()),
            diffs: Mutex::new(HashMap::new()),
            creation_dates: Mutex::new(HashMap::new()),
            failing_repos: Mutex::new(HashSet::new()),
            fail_diff_listing: AtomicBool::new(false),
            clone_delay: Mutex::new(Duration::ZERO),
            failing_clones: AtomicUsize::new(0),
            clone_calls: AtomicUsize::new(0),
            diff_list_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_head(&self, head: &str) {
        *self.head.lock().expect("head") = head.to_string();
    }

    pub fn set_changes(&self, changes: Vec<FileChange>) {
        *self.changes.lock().expect("changes") = changes;
    }

    pub fn set_diff(&self, file: &str, diff: &str) {
        self.diffs
            .lock()
            .expect("diffs")
            .insert(file.to_string(), diff.to_string());
    }

    pub fn set_creation_date(&self, file: &str, raw: &str) {
        self.creation_dates
            .lock()
            .expect("dates")
            .insert(file.to_string(), raw.to_string());
    }

    pub fn fail_clone_for(&self, repo_url: &str) {
        self.failing_repos
            .lock()
            .expect("failing repos")
            .insert(repo_url.to_string());
    }

    /// Fail the next `count` clones regardless of repository.
    pub fn fail_next_clones(&self, count: usize) {
        self.failing_clones.store(count, Ordering::SeqCst);
    }

    pub fn fail_diff_listing(&self, fail: bool) {
        self.fail_diff_listing.store(fail, Ordering::SeqCst);
    }

    pub fn set_clone_delay(&self, delay: Duration) {
        *self.clone_delay.lock().expect("delay") = delay;
    }

    pub fn clone_calls(&self) -> usize {
        self.clone_calls.load(Ordering::SeqCst)
    }

    pub fn diff_list_calls(&self) -> usize {
        self.diff_list_calls.load(Ordering::SeqCst)
    }
}

impl GitProvider for FakeGit {
    fn clone_or_update(&self, tracker: &Tracker) -> Result<PathBuf, GitError> {
        self.clone_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.clone_delay.lock().expect("delay");
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let fail_once = self
            .failing_clones
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail_once
            || self
                .failing_repos
                .lock()
                .expect("failing repos")
                .contains(&tracker.repo_url)
        {
            return Err(GitError::Failed {
                command: format!("clone {}", tracker.repo_url),
                stderr: "repository not found".to_string(),
            });
        }
        Ok(self.repo.clone())
    }

    fn current_commit(&self, _repo: &Path) -> Result<String, GitError> {
        Ok(self.head.lock().expect("head").clone())
    }

    fn changed_file_statuses(
        &self,
        _repo: &Path,
        _old_commit: &str,
        _new_commit: &str,
    ) -> Result<Vec<FileChange>, GitError> {
        self.diff_list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_diff_listing.load(Ordering::SeqCst) {
            return Err(GitError::Timeout {
                command: "diff --name-status".to_string(),
                timeout_secs: 1,
            });
        }
        Ok(self.changes.lock().expect("changes").clone())
    }

    fn file_diff(
        &self,
        _repo: &Path,
        _old_commit: &str,
        _new_commit: &str,
        file: &str,
    ) -> Result<String, GitError> {
        Ok(self
            .diffs
            .lock()
            .expect("diffs")
            .get(file)
            .cloned()
            .unwrap_or_default())
    }

    fn file_creation_date(&self, _repo: &Path, file: &str) -> Result<Option<String>, GitError> {
        Ok(self.creation_dates.lock().expect("dates").get(file).cloned())
    }
}

/// Answers with `summary <number>` / `detail <number>` and records requests.
#[derive(Default)]
pub struct FakeAnalyzer {
    requests: Mutex<Vec<AnalysisRequest>>,
    fail: AtomicBool,
}

impl FakeAnalyzer {
    pub fn fail_with_errors(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().expect("requests").clone()
    }
}

impl Analyzer for FakeAnalyzer {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, AnalysisError> {
        self.requests
            .lock()
            .expect("requests")
            .push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(AnalysisError::Timeout { timeout_secs: 1 });
        }
        Ok(Analysis {
            summary: format!("summary {}", request.number),
            detail: format!("detail {}", request.number),
        })
    }
}
