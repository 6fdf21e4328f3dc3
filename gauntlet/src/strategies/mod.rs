//! Strategies: retry/feedback policies driving one task x strategy pairing.
//!
//! A strategy decides *which prompt* each attempt sends; the shared attempt
//! loop in [`drive_attempts`] owns budget, termination and the caller-fault
//! policy, so every variant obeys the same contract:
//!
//! - between 1 and `max_attempts` attempts are emitted, numbered from 1;
//! - nothing is emitted after the first success;
//! - each attempt is handed to the observer (artifacts + row) before the next
//!   prompt is built;
//! - a non-retriable caller fault ends the pairing after recording that attempt.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{ErrorKind, EvalResult, Message, TokenUsage};
use crate::io::artifacts::attempt_dir;
use crate::io::provider::{CallerError, ModelCaller, elapsed_ms};
use crate::tasks::Task;

pub mod baseline;
pub mod critique_fix;

pub use baseline::BaselineStrategy;
pub use critique_fix::CritiqueFixStrategy;

/// Selection keys accepted by `--strategies`, in registry order.
pub const STRATEGY_KEYS: [&str; 2] = ["baseline", "critique_fix"];

/// Evidence of the previous attempt, passed explicitly to the next prompt.
#[derive(Debug, Clone, Copy)]
pub struct PriorAttempt<'a> {
    pub response_text: &'a str,
    pub eval: &'a EvalResult,
}

/// Everything captured for one emitted attempt.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub attempt_num: u32,
    pub prompt: Vec<Message>,
    /// Model text verbatim; empty when the call failed.
    pub response_text: String,
    /// Full payload, or the caller fault description.
    pub raw_response: Value,
    pub latency_ms: u64,
    pub usage: Option<TokenUsage>,
    pub eval: EvalResult,
    /// Attempt directory, also used as the evaluator's scratch area.
    pub artifact_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyStop {
    Succeeded { attempt: u32 },
    Exhausted { last_error: Option<ErrorKind> },
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutcome {
    pub attempts: u32,
    pub stop: StrategyStop,
}

pub trait Strategy {
    fn name(&self) -> &str;

    /// `false` clamps the attempt budget to one.
    fn supports_retry(&self) -> bool;

    /// Prompt for the next attempt; `previous` is `None` for attempt 1.
    fn next_prompt(
        &self,
        task: &dyn Task,
        previous: Option<PriorAttempt<'_>>,
    ) -> Result<Vec<Message>>;

    /// Drive attempts for `task`, handing each one to `on_attempt` in order.
    ///
    /// An `Err` from `on_attempt` stops the pairing and is returned as-is.
    fn run(
        &self,
        caller: &dyn ModelCaller,
        task: &dyn Task,
        pairing_dir: &Path,
        max_attempts: u32,
        on_attempt: &mut dyn FnMut(&AttemptOutcome) -> Result<()>,
    ) -> Result<StrategyOutcome> {
        drive_attempts(self, caller, task, pairing_dir, max_attempts, on_attempt)
    }
}

/// Instantiate the strategy registered under `key`.
pub fn build_strategy(key: &str) -> Result<Box<dyn Strategy>> {
    match key {
        "baseline" => Ok(Box::new(BaselineStrategy)),
        "critique_fix" => Ok(Box::new(CritiqueFixStrategy)),
        other => bail!(
            "unknown strategy '{other}' (available: {})",
            STRATEGY_KEYS.join(", ")
        ),
    }
}

/// Shared attempt loop.
#[instrument(skip_all, fields(task = task.name(), strategy = strategy.name(), max_attempts = max_attempts))]
pub fn drive_attempts<S: Strategy + ?Sized>(
    strategy: &S,
    caller: &dyn ModelCaller,
    task: &dyn Task,
    pairing_dir: &Path,
    max_attempts: u32,
    on_attempt: &mut dyn FnMut(&AttemptOutcome) -> Result<()>,
) -> Result<StrategyOutcome> {
    let budget = if strategy.supports_retry() {
        max_attempts.max(1)
    } else {
        1
    };

    let mut previous: Option<AttemptOutcome> = None;
    for attempt_num in 1..=budget {
        let prior = previous.as_ref().map(|attempt| PriorAttempt {
            response_text: &attempt.response_text,
            eval: &attempt.eval,
        });
        let prompt = strategy
            .next_prompt(task, prior)
            .with_context(|| format!("build prompt for attempt {attempt_num}"))?;
        let dir = attempt_dir(pairing_dir, attempt_num);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create attempt dir {}", dir.display()))?;

        let (attempt, fault) = call_and_evaluate(caller, task, attempt_num, prompt, dir);
        on_attempt(&attempt)?;

        if attempt.eval.success {
            info!(attempt = attempt_num, "pairing succeeded");
            return Ok(StrategyOutcome {
                attempts: attempt_num,
                stop: StrategyStop::Succeeded {
                    attempt: attempt_num,
                },
            });
        }
        if let Some(fault) = fault
            && !fault.is_retriable()
        {
            warn!(
                attempt = attempt_num,
                err = %fault,
                "non-retriable caller fault, aborting pairing"
            );
            return Ok(StrategyOutcome {
                attempts: attempt_num,
                stop: StrategyStop::Aborted {
                    reason: fault.to_string(),
                },
            });
        }
        debug!(attempt = attempt_num, error_kind = ?attempt.eval.error_kind, "attempt failed");
        previous = Some(attempt);
    }

    Ok(StrategyOutcome {
        attempts: budget,
        stop: StrategyStop::Exhausted {
            last_error: previous.and_then(|attempt| attempt.eval.error_kind),
        },
    })
}

fn call_and_evaluate(
    caller: &dyn ModelCaller,
    task: &dyn Task,
    attempt_num: u32,
    prompt: Vec<Message>,
    artifact_dir: PathBuf,
) -> (AttemptOutcome, Option<CallerError>) {
    let started = Instant::now();
    match caller.chat(&prompt) {
        Ok(response) => {
            let eval = task.evaluate(&response.text, &artifact_dir);
            let attempt = AttemptOutcome {
                attempt_num,
                prompt,
                response_text: response.text,
                raw_response: response.raw,
                latency_ms: response.latency_ms,
                usage: response.usage,
                eval,
                artifact_dir,
            };
            (attempt, None)
        }
        Err(fault) => {
            let payload = fault.to_payload();
            let eval = EvalResult::fail(fault.error_kind(), fault.to_string())
                .with_data(payload.clone());
            let attempt = AttemptOutcome {
                attempt_num,
                prompt,
                response_text: String::new(),
                raw_response: payload,
                latency_ms: elapsed_ms(started),
                usage: None,
                eval,
                artifact_dir,
            };
            (attempt, Some(fault))
        }
    }
}
