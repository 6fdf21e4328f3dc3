//! Attempt Orchestrator: drives every task x strategy pairing and persists each attempt.
//!
//! Enumeration order is fixed: tasks outer, strategies inner, both in the
//! order given by the plan. For every attempt the strategy emits, artifacts are
//! written first and the row is appended second, so a recorded row always has
//! a complete artifact directory. A persistence fault ends only the pairing it
//! occurred in; faults before the first pairing abort the run, including a run
//! root that already holds another run's attempt directories.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::{error, info, instrument};

use crate::core::types::{AttemptRecord, ErrorKind, RunRecord};
use crate::io::artifacts::{self, AttemptArtifacts};
use crate::io::config::GauntletConfig;
use crate::io::provider::ModelCaller;
use crate::io::store::AttemptSink;
use crate::strategies::{AttemptOutcome, Strategy, StrategyStop, build_strategy};
use crate::tasks::{Task, build_task};

/// What to run.
pub struct RunPlan {
    pub tasks: Vec<Box<dyn Task>>,
    pub strategies: Vec<Box<dyn Strategy>>,
    pub max_attempts: u32,
    /// Effective configuration recorded in `run.json`, when available.
    pub snapshot: Option<GauntletConfig>,
}

impl RunPlan {
    pub fn from_config(cfg: &GauntletConfig) -> Result<Self> {
        let tasks = cfg
            .tasks
            .iter()
            .map(|key| build_task(key, &cfg.checker))
            .collect::<Result<Vec<_>>>()?;
        let strategies = cfg
            .strategies
            .iter()
            .map(|key| build_strategy(key))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            tasks,
            strategies,
            max_attempts: cfg.max_attempts,
            snapshot: Some(cfg.clone()),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairingStatus {
    Passed { attempt: u32 },
    Failed { last_error: Option<ErrorKind> },
    /// Non-retriable caller fault; remaining attempts were skipped.
    Aborted { reason: String },
    /// Persistence or artifact fault; the pairing stopped early.
    Errored { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairingOutcome {
    pub task: String,
    pub strategy: String,
    /// Attempts recorded (artifacts + row) for this pairing.
    pub recorded: u32,
    pub status: PairingStatus,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub run_root: PathBuf,
    pub pairings: Vec<PairingOutcome>,
}

/// Execute `plan` under `run`, writing artifacts below `runs_dir/<run_id>/`.
///
/// `on_pairing` observes each pairing as it completes.
#[instrument(skip_all, fields(run_id = %run.run_id, tasks = plan.tasks.len(), strategies = plan.strategies.len()))]
pub fn run_gauntlet(
    run: &RunRecord,
    plan: &RunPlan,
    caller: &dyn ModelCaller,
    sink: &mut dyn AttemptSink,
    runs_dir: &Path,
    mut on_pairing: impl FnMut(&PairingOutcome),
) -> Result<RunSummary> {
    let run_root = artifacts::run_root(runs_dir, &run.run_id);
    artifacts::ensure_unused_run_root(&run_root)?;
    sink.create_run(run).context("register run")?;
    fs::create_dir_all(&run_root)
        .with_context(|| format!("create run root {}", run_root.display()))?;
    if let Some(config) = &plan.snapshot {
        artifacts::write_run_meta(&run_root, run, config).context("write run metadata")?;
    }
    info!(run_root = %run_root.display(), "run started");

    let mut pairings = Vec::with_capacity(plan.tasks.len() * plan.strategies.len());
    for task in &plan.tasks {
        for strategy in &plan.strategies {
            let outcome = run_pairing(
                run,
                task.as_ref(),
                strategy.as_ref(),
                plan.max_attempts,
                caller,
                sink,
                &run_root,
            );
            on_pairing(&outcome);
            pairings.push(outcome);
        }
    }

    info!(pairings = pairings.len(), "run finished");
    Ok(RunSummary {
        run_id: run.run_id.clone(),
        run_root,
        pairings,
    })
}

#[instrument(skip_all, fields(task = task.name(), strategy = strategy.name()))]
fn run_pairing(
    run: &RunRecord,
    task: &dyn Task,
    strategy: &dyn Strategy,
    max_attempts: u32,
    caller: &dyn ModelCaller,
    sink: &mut dyn AttemptSink,
    run_root: &Path,
) -> PairingOutcome {
    let pairing_dir = artifacts::pairing_dir(run_root, task.name(), strategy.name());
    let mut recorded = 0;
    let result = strategy.run(caller, task, &pairing_dir, max_attempts, &mut |attempt| {
        record_attempt(run, task.name(), strategy.name(), attempt, sink)?;
        recorded = attempt.attempt_num;
        Ok(())
    });

    let status = match result {
        Ok(outcome) => match outcome.stop {
            StrategyStop::Succeeded { attempt } => PairingStatus::Passed { attempt },
            StrategyStop::Exhausted { last_error } => PairingStatus::Failed { last_error },
            StrategyStop::Aborted { reason } => PairingStatus::Aborted { reason },
        },
        Err(err) => {
            error!(err = %format!("{err:#}"), recorded, "pairing stopped by fault");
            PairingStatus::Errored {
                error: format!("{err:#}"),
            }
        }
    };
    PairingOutcome {
        task: task.name().to_string(),
        strategy: strategy.name().to_string(),
        recorded,
        status,
    }
}

fn record_attempt(
    run: &RunRecord,
    task_name: &str,
    strategy_name: &str,
    attempt: &AttemptOutcome,
    sink: &mut dyn AttemptSink,
) -> Result<()> {
    artifacts::write_attempt(
        &attempt.artifact_dir,
        &AttemptArtifacts {
            prompt: &attempt.prompt,
            response_text: &attempt.response_text,
            raw_response: &attempt.raw_response,
            eval: &attempt.eval,
        },
    )
    .with_context(|| format!("write artifacts for attempt {}", attempt.attempt_num))?;

    let usage = attempt.usage.unwrap_or_default();
    sink.append_attempt(&AttemptRecord {
        run_id: run.run_id.clone(),
        task_name: task_name.to_string(),
        strategy_name: strategy_name.to_string(),
        attempt_num: attempt.attempt_num,
        success: attempt.eval.success,
        score: attempt.eval.score,
        latency_ms: attempt.latency_ms,
        error_kind: attempt.eval.error_kind,
        artifact_dir: attempt.artifact_dir.display().to_string(),
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
    })
    .with_context(|| format!("record attempt {}", attempt.attempt_num))
}
