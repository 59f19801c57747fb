use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::process::{run_blocking, RunFailure};
use crate::snapshot::Tracker;

const GIT_LOCK_FILES: [&str; 4] = ["index.lock", "HEAD.lock", "config.lock", "shallow.lock"];

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git {command}: {message}")]
    Spawn { command: String, message: String },
    #[error("git {command} failed: {stderr}")]
    Failed { command: String, stderr: String },
    #[error("git {command} timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },
    #[error("git workspace error at {path}: {message}")]
    Workspace { path: String, message: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Other,
}

impl ChangeStatus {
    pub fn from_code(code: &str) -> Self {
        match code.chars().next() {
            Some('A') => Self::Added,
            Some('M') => Self::Modified,
            Some('D') => Self::Deleted,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileChange {
    pub status: ChangeStatus,
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
}

/// Repository operations the tracker needs; implemented over the `git` binary.
pub trait GitProvider: Send + Sync {
    fn clone_or_update(&self, tracker: &Tracker) -> Result<PathBuf, GitError>;
    fn current_commit(&self, repo: &Path) -> Result<String, GitError>;
    fn changed_file_statuses(
        &self,
        repo: &Path,
        old_commit: &str,
        new_commit: &str,
    ) -> Result<Vec<FileChange>, GitError>;
    fn file_diff(
        &self,
        repo: &Path,
        old_commit: &str,
        new_commit: &str,
        file: &str,
    ) -> Result<String, GitError>;
    /// Raw author date (`%ai`) of the commit that added `file`.
    fn file_creation_date(&self, repo: &Path, file: &str) -> Result<Option<String>, GitError>;
}

pub struct GitCli {
    workspace_dir: PathBuf,
    timeout: Duration,
    repo_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl GitCli {
    pub fn new(workspace_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workspace_dir: workspace_dir.into(),
            timeout,
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    /// One working tree per repository and branch, so trackers on different
    /// branches of the same repository never share a checkout.
    pub fn repo_dir(&self, repo_url: &str, branch: &str) -> PathBuf {
        self.workspace_dir
            .join("proposal_repos")
            .join(sanitize_repo_name(&format!("{}@{branch}", repo_slug(repo_url))))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.repo_locks.lock().expect("git repo lock map poisoned");
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let command = args.join(" ");
        let mut cmd = Command::new("git");
        if let Some(cwd) = cwd {
            cmd.arg("-C").arg(cwd);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!("executing git {command}");

        let output = run_blocking(cmd, None, self.timeout).map_err(|failure| match failure {
            RunFailure::Spawn(message) => GitError::Spawn {
                command: command.clone(),
                message,
            },
            RunFailure::Timeout => GitError::Timeout {
                command: command.clone(),
                timeout_secs: self.timeout.as_secs(),
            },
        })?;
        if !output.success {
            return Err(GitError::Failed {
                command,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    fn fetch_and_reset(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        cleanup_git_locks(repo);
        self.run(Some(repo), &["fetch", "origin"])?;
        let target = format!("origin/{branch}");
        self.run(Some(repo), &["reset", "--hard", target.as_str()])?;
        Ok(())
    }
}

impl GitProvider for GitCli {
    fn clone_or_update(&self, tracker: &Tracker) -> Result<PathBuf, GitError> {
        let local_dir = self.repo_dir(&tracker.repo_url, &tracker.branch);
        let lock = self.lock_for(&local_dir);
        let _guard = lock.lock().expect("git repo lock poisoned");

        if local_dir.join(".git").exists() {
            info!("syncing {} ({})", tracker.repo_url, tracker.branch);
            self.fetch_and_reset(&local_dir, &tracker.branch)?;
            return Ok(local_dir);
        }

        let workspace_error = |e: std::io::Error, path: &Path| GitError::Workspace {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        if local_dir.exists() {
            std::fs::remove_dir_all(&local_dir).map_err(|e| workspace_error(e, &local_dir))?;
        }
        if let Some(parent) = local_dir.parent() {
            std::fs::create_dir_all(parent).map_err(|e| workspace_error(e, parent))?;
        }

        info!("cloning {} ({})", tracker.repo_url, tracker.branch);
        let target = local_dir.to_string_lossy().to_string();
        self.run(
            None,
            &[
                "clone",
                "--single-branch",
                "--branch",
                tracker.branch.as_str(),
                tracker.repo_url.as_str(),
                target.as_str(),
            ],
        )?;
        Ok(local_dir)
    }

    fn current_commit(&self, repo: &Path) -> Result<String, GitError> {
        Ok(self.run(Some(repo), &["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn changed_file_statuses(
        &self,
        repo: &Path,
        old_commit: &str,
        new_commit: &str,
    ) -> Result<Vec<FileChange>, GitError> {
        let output = self.run(
            Some(repo),
            &["diff", "--name-status", "--no-renames", old_commit, new_commit],
        )?;
        Ok(parse_name_status(&output))
    }

    fn file_diff(
        &self,
        repo: &Path,
        old_commit: &str,
        new_commit: &str,
        file: &str,
    ) -> Result<String, GitError> {
        self.run(Some(repo), &["diff", old_commit, new_commit, "--", file])
    }

    fn file_creation_date(&self, repo: &Path, file: &str) -> Result<Option<String>, GitError> {
        let output = self.run(
            Some(repo),
            &["log", "--diff-filter=A", "--follow", "--format=%ai", "--", file],
        )?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string))
    }
}

/// Parse `git diff --name-status` output into file changes.
pub fn parse_name_status(output: &str) -> Vec<FileChange> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split('\t');
            let code = parts.next()?.trim();
            let path = parts.last()?.trim();
            if code.is_empty() || path.is_empty() {
                return None;
            }
            Some(FileChange {
                status: ChangeStatus::from_code(code),
                path: path.to_string(),
            })
        })
        .collect()
}

/// Parse the `%ai` author date printed by `git log`.
pub fn parse_creation_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S %z").ok()
}

/// `owner/repo` for GitHub URLs, the URL itself otherwise.
pub fn repo_slug(repo_url: &str) -> String {
    github_slug(repo_url).unwrap_or_else(|| trim_repo_url(repo_url).to_string())
}

/// `owner/repo` from https, scp-style and ssh GitHub URLs.
pub fn github_slug(repo_url: &str) -> Option<String> {
    let trimmed = trim_repo_url(repo_url);
    ["https://github.com/", "git@github.com:", "ssh://git@github.com/"]
        .into_iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .filter(|slug| slug.split('/').filter(|part| !part.is_empty()).count() == 2)
        .map(str::to_string)
}

fn trim_repo_url(repo_url: &str) -> &str {
    let trimmed = repo_url.trim().trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed)
}

/// Filesystem-safe directory name: `[A-Za-z0-9_-]` only, runs of `_`
/// collapsed, no leading or trailing `_`.
pub fn sanitize_repo_name(name: &str) -> String {
    let name = name.strip_suffix(".git").unwrap_or(name);
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('_').to_string()
}

fn cleanup_git_locks(repo: &Path) {
    let git_dir = repo.join(".git");
    for name in GIT_LOCK_FILES {
        let lock = git_dir.join(name);
        if lock.exists() {
            match std::fs::remove_file(&lock) {
                Ok(()) => warn!("removed stale git lock {}", lock.display()),
                Err(e) => warn!("failed removing git lock {}: {e}", lock.display()),
            }
        }
    }
}
