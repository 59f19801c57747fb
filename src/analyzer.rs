use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::classifier::EventType;
use crate::process::{run_blocking, RunFailure};
use crate::proposal::TrackerType;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to run analyzer {command}: {message}")]
    Spawn { command: String, message: String },
    #[error("analyzer timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("analyzer exited unsuccessfully: {stderr}")]
    Failed { stderr: String },
    #[error("analyzer output is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("analyzer response is missing 'summary' or 'detail'")]
    MissingFields,
}

/// What the analyzer reads: the whole proposal, or the diff of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisInput {
    ProposalText(String),
    DiffText(String),
}

impl AnalysisInput {
    pub fn text(&self) -> &str {
        match self {
            Self::ProposalText(text) | Self::DiffText(text) => text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub tracker_type: TrackerType,
    pub event_type: EventType,
    pub number: u32,
    pub title: String,
    pub old_status: Option<String>,
    pub new_status: Option<String>,
    pub input: AnalysisInput,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Analysis {
    pub summary: String,
    pub detail: String,
}

impl Analysis {
    pub fn is_complete(&self) -> bool {
        !self.summary.is_empty() && !self.detail.is_empty()
    }
}

pub trait Analyzer: Send + Sync {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, AnalysisError>;
}

/// Used when analysis is switched off.
pub struct NoopAnalyzer;

impl Analyzer for NoopAnalyzer {
    fn analyze(&self, _request: &AnalysisRequest) -> Result<Analysis, AnalysisError> {
        Ok(Analysis::default())
    }
}

/// Runs an AI command line tool as `<command> -p <prompt>` with the proposal
/// text or diff on stdin, expecting a JSON object with `summary` and
/// `detail` somewhere in its output.
pub struct ClaudeCliAnalyzer {
    command: String,
    timeout: Duration,
    language: String,
}

impl ClaudeCliAnalyzer {
    pub fn new(command: impl Into<String>, timeout: Duration, language: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout,
            language: language.into(),
        }
    }

    pub fn prompt(&self, request: &AnalysisRequest) -> String {
        build_prompt(request, &self.language)
    }
}

impl Analyzer for ClaudeCliAnalyzer {
    fn analyze(&self, request: &AnalysisRequest) -> Result<Analysis, AnalysisError> {
        let prompt = self.prompt(request);
        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg(&prompt)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        debug!(
            "analyzing {} {} ({}) with {}",
            request.tracker_type, request.number, request.event_type, self.command
        );

        let output = run_blocking(cmd, Some(request.input.text().to_string()), self.timeout)
            .map_err(|failure| match failure {
                RunFailure::Spawn(message) => AnalysisError::Spawn {
                    command: self.command.clone(),
                    message,
                },
                RunFailure::Timeout => AnalysisError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                },
            })?;
        if !output.success && output.stdout.trim().is_empty() {
            return Err(AnalysisError::Failed {
                stderr: output.stderr.trim().to_string(),
            });
        }
        parse_analysis(&output.stdout)
    }
}

/// Pull the outermost `{...}` object out of free-form output and read the
/// two required fields from it.
pub fn parse_analysis(output: &str) -> Result<Analysis, AnalysisError> {
    let json = extract_json(output)
        .ok_or_else(|| AnalysisError::InvalidJson("no JSON object in output".to_string()))?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| AnalysisError::InvalidJson(e.to_string()))?;
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    };
    let analysis = Analysis {
        summary: field("summary"),
        detail: field("detail"),
    };
    if !analysis.is_complete() {
        return Err(AnalysisError::MissingFields);
    }
    Ok(analysis)
}

fn extract_json(output: &str) -> Option<&str> {
    let start = output.find('{')?;
    let end = output.rfind('}')?;
    (end > start).then(|| &output[start..=end])
}

fn build_prompt(request: &AnalysisRequest, language: &str) -> String {
    let subject = format!(
        "{} {}: {}",
        request.tracker_type, request.number, request.title
    );
    let old_status = request.old_status.as_deref().unwrap_or("unknown");
    let new_status = request.new_status.as_deref().unwrap_or("unknown");

    let task = match request.event_type {
        EventType::Created => format!(
            "A new proposal was published: {subject}. The full proposal text is on stdin. \
             Explain what it proposes, the problem it addresses and who is affected."
        ),
        EventType::Accepted => format!(
            "The proposal {subject} was accepted (status {old_status} -> {new_status}). \
             The full proposal text is on stdin. Explain what now becomes part of the \
             standard and what implementers need to do."
        ),
        EventType::Rejected => format!(
            "The proposal {subject} was rejected (status {old_status} -> {new_status}). \
             The full proposal text is on stdin. Explain what was proposed and the likely \
             reasons it did not move forward."
        ),
        EventType::Withdrawn => format!(
            "The proposal {subject} was withdrawn (status {old_status} -> {new_status}). \
             The full proposal text is on stdin. Explain what was proposed and what its \
             withdrawal means for anyone following it."
        ),
        EventType::ContentModified => format!(
            "The proposal {subject} was edited. A unified diff of the change is on stdin. \
             Describe what changed and whether the change is substantive or editorial."
        ),
        EventType::StatusChanged
        | EventType::Postponed
        | EventType::Resurrected
        | EventType::Superseded => format!(
            "The status of the proposal {subject} changed from {old_status} to \
             {new_status}. The full proposal text is on stdin. Explain what the proposal \
             is about and what this status change means."
        ),
    };

    format!(
        "{task}\n\n\
         Language requirement: the user-configured output language is \"{language}\". \
         Use this language for all of your output.\n\n\
         Respond with a single JSON object and nothing else:\n\
         {{\"summary\": \"one sentence\", \"detail\": \"a few short paragraphs\"}}"
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn request(event_type: EventType, input: AnalysisInput) -> AnalysisRequest {
        AnalysisRequest {
            tracker_type: TrackerType::Pep,
            event_type,
            number: 8,
            title: "Style Guide for Python Code".to_string(),
            old_status: Some("Draft".to_string()),
            new_status: Some("Active".to_string()),
            input,
        }
    }

    #[test]
    fn parses_json_embedded_in_chatter() {
        let output = "Sure! Here you go:\n{\"summary\": \"Short\", \"detail\": \"Longer {text}\"}\nDone.";
        let analysis = parse_analysis(output).expect("analysis should parse");
        assert_eq!(analysis.summary, "Short");
        assert_eq!(analysis.detail, "Longer {text}");
    }

    #[test]
    fn rejects_missing_or_empty_fields() {
        assert!(matches!(
            parse_analysis("{\"summary\": \"only\"}"),
            Err(AnalysisError::MissingFields)
        ));
        assert!(matches!(
            parse_analysis("{\"summary\": \"x\", \"detail\": \"  \"}"),
            Err(AnalysisError::MissingFields)
        ));
        assert!(matches!(
            parse_analysis("no json here"),
            Err(AnalysisError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_analysis("{not json}"),
            Err(AnalysisError::InvalidJson(_))
        ));
    }

    #[test]
    fn prompts_follow_event_type_and_language() {
        let analyzer = ClaudeCliAnalyzer::new("claude", Duration::from_secs(1), "de");
        let accepted = analyzer.prompt(&request(
            EventType::Accepted,
            AnalysisInput::ProposalText("text".to_string()),
        ));
        assert!(accepted.contains("was accepted"));
        assert!(accepted.contains("PEP 8"));
        assert!(accepted.contains("\"de\""));

        let modified = analyzer.prompt(&request(
            EventType::ContentModified,
            AnalysisInput::DiffText("+x".to_string()),
        ));
        assert!(modified.contains("unified diff"));

        let postponed = analyzer.prompt(&request(
            EventType::Postponed,
            AnalysisInput::ProposalText("text".to_string()),
        ));
        assert!(postponed.contains("from Draft to Active"));
    }

    #[test]
    fn missing_command_is_a_spawn_error() {
        let analyzer =
            ClaudeCliAnalyzer::new("definitely-not-a-real-binary-4821", Duration::from_secs(1), "en");
        let result = analyzer.analyze(&request(
            EventType::Created,
            AnalysisInput::ProposalText("text".to_string()),
        ));
        assert!(matches!(result, Err(AnalysisError::Spawn { .. })));
    }

    #[test]
    fn noop_analyzer_returns_empty_analysis() {
        let analysis = NoopAnalyzer
            .analyze(&request(
                EventType::Created,
                AnalysisInput::ProposalText(String::new()),
            ))
            .expect("noop never fails");
        assert!(!analysis.is_complete());
    }
}
