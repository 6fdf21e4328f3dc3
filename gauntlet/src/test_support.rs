//! Scripted collaborators for orchestrator and strategy tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use serde_json::json;

use crate::core::types::{AttemptRecord, ErrorKind, EvalResult, Message, RunRecord};
use crate::io::provider::{CallerError, ChatResponse, ModelCaller};
use crate::io::store::AttemptSink;
use crate::tasks::Task;

/// Temporary runs directory plus a fixed run record.
pub struct RunFixture {
    pub temp: tempfile::TempDir,
    pub run: RunRecord,
}

impl RunFixture {
    pub fn new(run_id: &str) -> Self {
        Self {
            temp: tempfile::tempdir().expect("tempdir"),
            run: RunRecord {
                run_id: run_id.to_string(),
                started_at: "2026-01-01T00:00:00Z".to_string(),
                model: "scripted-model".to_string(),
                base_url: "http://localhost:1234/v1".to_string(),
                git_commit: Some("0123abcd".to_string()),
            },
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.temp.path().join("runs")
    }

    pub fn attempt_dir(&self, task: &str, strategy: &str, attempt_num: u32) -> PathBuf {
        self.runs_dir()
            .join(&self.run.run_id)
            .join(format!("{task}_{strategy}"))
            .join(format!("attempt_{attempt_num}"))
    }
}

/// Successful chat response carrying `text`.
pub fn text_response(text: &str) -> Result<ChatResponse, CallerError> {
    Ok(ChatResponse {
        text: text.to_string(),
        raw: json!({
            "choices": [{ "message": { "role": "assistant", "content": text } }],
        }),
        latency_ms: 5,
        usage: None,
    })
}

/// Model caller replaying a fixed queue of replies and recording every request.
///
/// Once the queue is drained, further calls fail with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedCaller {
    replies: RefCell<VecDeque<Result<ChatResponse, CallerError>>>,
    requests: RefCell<Vec<Vec<Message>>>,
}

impl ScriptedCaller {
    pub fn new(replies: impl IntoIterator<Item = Result<ChatResponse, CallerError>>) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl ModelCaller for ScriptedCaller {
    fn chat(&self, messages: &[Message]) -> Result<ChatResponse, CallerError> {
        self.requests.borrow_mut().push(messages.to_vec());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(CallerError::Transport("script exhausted".to_string())))
    }
}

/// Task returning queued evaluation results in order.
#[derive(Debug)]
pub struct ScriptedTask {
    name: String,
    results: RefCell<VecDeque<EvalResult>>,
    fallback: Option<ErrorKind>,
    evaluated: RefCell<Vec<String>>,
}

impl ScriptedTask {
    /// Once `results` is drained, evaluation fails with `checker_failure`.
    pub fn new(name: &str, results: impl IntoIterator<Item = EvalResult>) -> Self {
        Self {
            name: name.to_string(),
            results: RefCell::new(results.into_iter().collect()),
            fallback: None,
            evaluated: RefCell::new(Vec::new()),
        }
    }

    pub fn always_failing(name: &str, kind: ErrorKind) -> Self {
        Self {
            fallback: Some(kind),
            ..Self::new(name, [])
        }
    }

    /// Response texts seen by `evaluate`, in order.
    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.borrow().clone()
    }
}

impl Task for ScriptedTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn prompt(&self) -> Vec<Message> {
        vec![
            Message::system("You are a test model."),
            Message::user(format!("Solve {}.", self.name)),
        ]
    }

    fn evaluate(&self, response_text: &str, _scratch_dir: &Path) -> EvalResult {
        self.evaluated.borrow_mut().push(response_text.to_string());
        if let Some(result) = self.results.borrow_mut().pop_front() {
            return result;
        }
        let kind = self.fallback.unwrap_or(ErrorKind::CheckerFailure);
        EvalResult::fail(kind, format!("scripted {kind} for {response_text:?}"))
    }
}

/// In-memory sink with optional failure injection.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub runs: Vec<RunRecord>,
    pub attempts: Vec<AttemptRecord>,
    /// Fail `create_run` calls.
    pub fail_create_run: bool,
    /// Fail `append_attempt` for rows of this task name.
    pub fail_task: Option<String>,
}

impl MemorySink {
    pub fn attempts_for(&self, task: &str, strategy: &str) -> Vec<&AttemptRecord> {
        self.attempts
            .iter()
            .filter(|a| a.task_name == task && a.strategy_name == strategy)
            .collect()
    }
}

impl AttemptSink for MemorySink {
    fn create_run(&mut self, run: &RunRecord) -> Result<()> {
        if self.fail_create_run {
            bail!("injected create_run failure");
        }
        if !self.runs.contains(run) {
            self.runs.push(run.clone());
        }
        Ok(())
    }

    fn append_attempt(&mut self, attempt: &AttemptRecord) -> Result<()> {
        if self.fail_task.as_deref() == Some(attempt.task_name.as_str()) {
            bail!("injected append failure for {}", attempt.task_name);
        }
        let duplicate = self.attempts.iter().any(|a| {
            a.run_id == attempt.run_id
                && a.task_name == attempt.task_name
                && a.strategy_name == attempt.strategy_name
                && a.attempt_num == attempt.attempt_num
        });
        if duplicate {
            bail!("duplicate attempt slot {}", attempt.attempt_num);
        }
        self.attempts.push(attempt.clone());
        Ok(())
    }
}
