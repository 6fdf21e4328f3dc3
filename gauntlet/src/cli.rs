//! CLI command implementations.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{Local, SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::core::metrics::compute_metrics;
use crate::core::types::RunRecord;
use crate::io::artifacts;
use crate::io::config::{ConfigOverrides, GauntletConfig, resolve_config, validate_run_id};
use crate::io::git::head_commit;
use crate::io::provider::{ChatSettings, OpenAiCompatClient};
use crate::io::report::{format_summary_table, generate_report};
use crate::io::store::SqliteStore;
use crate::orchestrator::{PairingOutcome, PairingStatus, RunPlan, run_gauntlet};
use crate::strategies::{STRATEGY_KEYS, build_strategy};
use crate::tasks::{TASK_KEYS, build_task};

/// Options of `gauntlet run` beyond the shared config overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub run_id: Option<String>,
    pub provenance: Option<String>,
}

/// Default run id: local timestamp `YYYYMMDD_HHMMSS`.
pub fn default_run_id() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

fn client_for(cfg: &GauntletConfig) -> Result<OpenAiCompatClient> {
    OpenAiCompatClient::new(
        &cfg.base_url,
        ChatSettings {
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
        },
        Duration::from_secs(cfg.timeout_secs),
    )
}

/// Run every selected pairing, then write the report.
pub fn run(
    repo_root: &Path,
    config_path: &Path,
    overrides: ConfigOverrides,
    options: RunOptions,
) -> Result<()> {
    let cfg = resolve_config(config_path, overrides)?;
    let run_id = options.run_id.unwrap_or_else(default_run_id);
    validate_run_id(&run_id)?;
    let git_commit = options.provenance.or_else(|| head_commit(repo_root));

    let run = RunRecord {
        run_id: run_id.clone(),
        started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        model: cfg.model.clone(),
        base_url: cfg.base_url.clone(),
        git_commit,
    };
    let plan = RunPlan::from_config(&cfg)?;
    let caller = client_for(&cfg)?;
    let mut store = SqliteStore::open(&cfg.db_path)?;
    debug!(db = %cfg.db_path.display(), "store opened");

    println!(
        "run: id={} model={} tasks={} strategies={} max_attempts={}",
        run_id,
        cfg.model,
        cfg.tasks.join(","),
        cfg.strategies.join(","),
        cfg.max_attempts
    );
    let summary = run_gauntlet(&run, &plan, &caller, &mut store, &cfg.runs_dir, print_pairing)
        .context("run gauntlet")?;

    let paths = generate_report(&store, &run_id, &summary.run_root).context("write report")?;
    let metrics = compute_metrics(&store.attempts_for_run(&run_id)?);
    println!();
    print!("{}", format_summary_table(&metrics));
    println!();
    println!("report: {}", paths.markdown.display());
    println!("results: {}", paths.csv.display());

    let errored = summary
        .pairings
        .iter()
        .filter(|p| matches!(p.status, PairingStatus::Errored { .. }))
        .count();
    if errored > 0 {
        warn!(errored, "some pairings stopped on persistence faults");
        eprintln!("warning: {errored} pairing(s) stopped early; see log output above");
    }
    info!(run_id, "run complete");
    Ok(())
}

fn print_pairing(outcome: &PairingOutcome) {
    let status = match &outcome.status {
        PairingStatus::Passed { attempt } => format!("PASS (attempt {attempt})"),
        PairingStatus::Failed { last_error } => format!(
            "FAIL ({})",
            last_error.map_or("unknown", |kind| kind.as_str())
        ),
        PairingStatus::Aborted { reason } => format!("ABORTED ({reason})"),
        PairingStatus::Errored { error } => format!("ERROR ({error})"),
    };
    println!(
        "pairing: {}_{} attempts={} {}",
        outcome.task, outcome.strategy, outcome.recorded, status
    );
}

/// Regenerate `report.md` and `results.csv` for a recorded run.
pub fn report(config_path: &Path, overrides: ConfigOverrides, run_id: &str) -> Result<()> {
    let cfg = resolve_config(config_path, overrides)?;
    validate_run_id(run_id)?;
    if !cfg.db_path.exists() {
        bail!("database {} not found", cfg.db_path.display());
    }
    let store = SqliteStore::open(&cfg.db_path)?;
    let out_dir = artifacts::run_root(&cfg.runs_dir, run_id);
    let paths = generate_report(&store, run_id, &out_dir)?;

    let metrics = compute_metrics(&store.attempts_for_run(run_id)?);
    print!("{}", format_summary_table(&metrics));
    println!("report: {}", paths.markdown.display());
    println!("results: {}", paths.csv.display());
    Ok(())
}

/// Print the task and strategy registries.
pub fn list() -> Result<()> {
    let checker = crate::io::config::CheckerConfig::default();
    println!("tasks:");
    for key in TASK_KEYS {
        let task = build_task(key, &checker)?;
        println!("  {key:<8} -> {}", task.name());
    }
    println!("strategies:");
    for key in STRATEGY_KEYS {
        let strategy = build_strategy(key)?;
        let mode = if strategy.supports_retry() {
            "feedback retry"
        } else {
            "one-shot"
        };
        println!("  {key:<12} {mode}");
    }
    Ok(())
}

/// Print the model ids served by the configured endpoint.
pub fn models(config_path: &Path, overrides: ConfigOverrides) -> Result<()> {
    let cfg = resolve_config(config_path, overrides)?;
    let models = client_for(&cfg)?
        .list_models()
        .with_context(|| format!("list models at {}", cfg.base_url))?;
    if models.is_empty() {
        println!("no models reported by {}", cfg.base_url);
    }
    for model in models {
        let marker = if model == cfg.model { "*" } else { " " };
        println!("{marker} {model}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_run_id_is_a_valid_timestamp_id() {
        let run_id = default_run_id();
        validate_run_id(&run_id).expect("valid");
        assert_eq!(run_id.len(), "20260101_120000".len());
        assert_eq!(run_id.as_bytes()[8], b'_');
    }

    #[test]
    fn report_requires_existing_database() {
        let temp = tempfile::tempdir().expect("tempdir");
        let overrides = ConfigOverrides {
            db_path: Some(temp.path().join("missing.sqlite")),
            ..ConfigOverrides::default()
        };
        let err =
            report(&temp.path().join("gauntlet.toml"), overrides, "r1").expect_err("missing db");
        assert!(err.to_string().contains("not found"));
    }
}
