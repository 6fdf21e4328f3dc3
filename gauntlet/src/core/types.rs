//! Shared data model: chat messages, evaluation results, run and attempt records.
//!
//! These types define the contracts between tasks, strategies, the orchestrator
//! and the persistence layer. Serialized forms are part of the artifact layout
//! and must stay stable.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat role of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Closed set of failure classifications attached to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport fault, non-success status, or malformed payload from the model endpoint.
    ProviderError,
    /// The model call or the checker exceeded its wall-clock bound.
    Timeout,
    /// The response did not parse as JSON.
    JsonParseError,
    /// The response parsed but violated the declared schema.
    SchemaError,
    /// No syntactically valid code could be extracted from the response.
    ExtractionFailure,
    /// The check suite ran and reported failing assertions.
    TestFailure,
    /// The checker itself could not run or crashed.
    CheckerFailure,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::ProviderError,
        ErrorKind::Timeout,
        ErrorKind::JsonParseError,
        ErrorKind::SchemaError,
        ErrorKind::ExtractionFailure,
        ErrorKind::TestFailure,
        ErrorKind::CheckerFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ProviderError => "provider_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::JsonParseError => "json_parse_error",
            ErrorKind::SchemaError => "schema_error",
            ErrorKind::ExtractionFailure => "extraction_failure",
            ErrorKind::TestFailure => "test_failure",
            ErrorKind::CheckerFailure => "checker_failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured output of a checker subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerOutput {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    /// Bytes discarded beyond the output limit.
    #[serde(default)]
    pub stdout_truncated: usize,
    #[serde(default)]
    pub stderr_truncated: usize,
}

/// Free-form evidence explaining an evaluation.
///
/// Persisted in `eval_result.json` and fed back to feedback-capable strategies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Human-readable error text (empty on success).
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checker: Option<CheckerOutput>,
    /// Task-specific structured detail (parsed object, extraction method, ...).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

/// Outcome of scoring one model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub success: bool,
    /// Score in `[0.0, 1.0]`; binary tasks only use 0 and 1.
    pub score: f64,
    pub error_kind: Option<ErrorKind>,
    pub diagnostic: Diagnostic,
}

impl EvalResult {
    pub fn pass() -> Self {
        Self {
            success: true,
            score: 1.0,
            error_kind: None,
            diagnostic: Diagnostic::default(),
        }
    }

    pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            score: 0.0,
            error_kind: Some(kind),
            diagnostic: Diagnostic {
                message: message.into(),
                ..Diagnostic::default()
            },
        }
    }

    pub fn with_checker(mut self, checker: CheckerOutput) -> Self {
        self.diagnostic.checker = Some(checker);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.diagnostic.data = data;
        self
    }
}

/// Optional token counters reported by the model endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

/// One process invocation of the harness. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    /// RFC 3339 start timestamp.
    pub started_at: String,
    pub model: String,
    pub base_url: String,
    /// Provenance tag (git commit of the harness checkout by default).
    pub git_commit: Option<String>,
}

/// Persisted row for one model-call-plus-evaluation cycle.
///
/// Append-only: a corrected attempt is a new row with the next `attempt_num`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub run_id: String,
    pub task_name: String,
    pub strategy_name: String,
    /// 1-based, gap-free within a task x strategy pairing.
    pub attempt_num: u32,
    pub success: bool,
    pub score: f64,
    pub latency_ms: u64,
    pub error_kind: Option<ErrorKind>,
    pub artifact_dir: String,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_round_trips_through_tag() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert_eq!(ErrorKind::parse("pytest_failure"), None);
    }

    #[test]
    fn eval_result_serializes_null_error_kind_on_success() {
        let value = serde_json::to_value(EvalResult::pass()).expect("serialize");
        assert_eq!(value["success"], true);
        assert_eq!(value["score"], 1.0);
        assert!(value["error_kind"].is_null());
        assert!(value["diagnostic"].get("checker").is_none());
    }

    #[test]
    fn message_roles_serialize_lowercase() {
        let value = serde_json::to_value(Message::system("be precise")).expect("serialize");
        assert_eq!(value["role"], "system");
        assert_eq!(value["content"], "be precise");
    }
}
