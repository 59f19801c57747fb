use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::proposal::TrackerType;
use crate::snapshot::TrackerKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub check: CheckConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub trackers: Vec<TrackerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    #[serde(default = "default_git_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_analyzer_command")]
    pub command: String,
    #[serde(default = "default_analyzer_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enable_stdout: bool,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default)]
    pub high_priority_only: bool,
}

/// One `[[trackers]]` entry: a proposal repository to follow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerConfig {
    #[serde(rename = "type")]
    pub tracker_type: TrackerType,
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub proposal_dir: String,
    #[serde(default)]
    pub file_pattern: String,
}

impl TrackerConfig {
    pub fn key(&self) -> TrackerKey {
        TrackerKey {
            tracker_type: self.tracker_type,
            repo_url: self.repo_url.clone(),
            branch: self.branch.clone(),
            proposal_dir: self.proposal_dir.clone(),
            file_pattern: self.file_pattern.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub db_path: Option<String>,
    pub concurrency: Option<usize>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/proposal-tracker/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        parsed
            .validate()
            .with_context(|| format!("invalid config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        for tracker in &self.trackers {
            if !is_github_repo_url(&tracker.repo_url) {
                bail!(
                    "{} tracker repo_url must look like https://github.com/<owner>/<repo>: {}",
                    tracker.tracker_type,
                    tracker.repo_url
                );
            }
            if tracker.branch.trim().is_empty() {
                bail!("{} tracker {} has an empty branch", tracker.tracker_type, tracker.repo_url);
            }
        }
        if self.check.concurrency == 0 {
            bail!("check.concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(db_path) = overrides.db_path {
            self.storage.db_path = db_path;
        }
        if let Some(concurrency) = overrides.concurrency {
            self.check.concurrency = concurrency.max(1);
        }
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_workspace_dir(&self) -> PathBuf {
        expand_tilde(&self.git.workspace_dir)
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git.timeout_secs)
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer.timeout_secs)
    }

    pub fn default_template() -> String {
        let template = r#"[storage]
db_path = "~/.local/share/proposal-tracker/tracker.db"

[git]
workspace_dir = "~/.local/share/proposal-tracker/repos"
timeout_secs = 300

[analyzer]
# AI command line tool invoked as `<command> -p <prompt>`
enabled = true
command = "claude"
timeout_secs = 600
language = "en"

[check]
concurrency = 1

[notify]
enable_stdout = true
webhook_url = ""
high_priority_only = false

[[trackers]]
type = "eip"
repo_url = "https://github.com/ethereum/EIPs"
branch = "master"
proposal_dir = "EIPS"
file_pattern = "eip-*.md"

[[trackers]]
type = "pep"
repo_url = "https://github.com/python/peps"
branch = "main"
proposal_dir = "peps"
file_pattern = "pep-*.rst"

[[trackers]]
type = "rust_rfc"
repo_url = "https://github.com/rust-lang/rfcs"
branch = "master"
proposal_dir = "text"
file_pattern = "*.md"

[[trackers]]
type = "django_dep"
repo_url = "https://github.com/django/deps"
branch = "main"
enabled = false
proposal_dir = ""
file_pattern = "*.rst"
"#;
        template.to_string()
    }
}

/// `https://github.com/<owner>/<repo>` with an optional `.git` suffix.
pub fn is_github_repo_url(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("https://github.com/") else {
        return false;
    };
    let rest = rest.strip_suffix(".git").unwrap_or(rest);
    let valid_segment = |segment: &str| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    };
    match rest.split_once('/') {
        Some((owner, repo)) => valid_segment(owner) && valid_segment(repo),
        None => false,
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            git: GitConfig::default(),
            analyzer: AnalyzerConfig::default(),
            check: CheckConfig::default(),
            notify: NotifyConfig::default(),
            trackers: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            workspace_dir: default_workspace_dir(),
            timeout_secs: default_git_timeout_secs(),
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_analyzer_command(),
            timeout_secs: default_analyzer_timeout_secs(),
            language: default_language(),
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enable_stdout: true,
            webhook_url: String::new(),
            high_priority_only: false,
        }
    }
}

fn default_db_path() -> String {
    "~/.local/share/proposal-tracker/tracker.db".to_string()
}

fn default_workspace_dir() -> String {
    "~/.local/share/proposal-tracker/repos".to_string()
}

fn default_git_timeout_secs() -> u64 {
    300
}

fn default_analyzer_command() -> String {
    "claude".to_string()
}

fn default_analyzer_timeout_secs() -> u64 {
    600
}

fn default_language() -> String {
    "en".to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_true() -> bool {
    true
}
