//! Report Generator: `report.md` and `results.csv` rendered from persisted attempt rows.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::metrics::{PassRate, RunMetrics, compute_metrics};
use crate::core::types::{AttemptRecord, RunRecord};
use crate::io::artifacts::write_text;
use crate::io::store::SqliteStore;

const REPORT_TEMPLATE: &str = include_str!("templates/report.md");

#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub markdown: PathBuf,
    pub csv: PathBuf,
}

#[derive(Debug, Serialize)]
struct RateRow {
    name: String,
    rate: String,
}

#[derive(Debug, Serialize)]
struct PairingRow {
    task: String,
    strategy: String,
    result: &'static str,
    attempts_to_success: String,
    total_attempts: usize,
    latency_ms: u64,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    run_id: &'a str,
    task_name: &'a str,
    strategy_name: &'a str,
    attempt_num: u32,
    success: bool,
    score: f64,
    latency_ms: u64,
    error_type: &'a str,
    artifact_dir: &'a str,
    created_at: &'a str,
}

/// Query the store and write both report files into `out_dir`.
#[instrument(skip_all, fields(run_id = %run_id))]
pub fn generate_report(store: &SqliteStore, run_id: &str, out_dir: &Path) -> Result<ReportPaths> {
    let run = store
        .get_run(run_id)?
        .ok_or_else(|| anyhow!("run '{run_id}' not found in database"))?;
    let attempts = store.attempts_for_run(run_id)?;
    let metrics = compute_metrics(&attempts);

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("create report dir {}", out_dir.display()))?;
    let paths = ReportPaths {
        markdown: out_dir.join("report.md"),
        csv: out_dir.join("results.csv"),
    };
    write_text(&paths.markdown, &render_markdown(&run, &metrics)?)?;
    write_text(&paths.csv, &render_csv(&attempts)?)?;

    info!(
        attempts = attempts.len(),
        pairings = metrics.pairings.len(),
        "report written"
    );
    Ok(paths)
}

pub fn render_markdown(run: &RunRecord, metrics: &RunMetrics) -> Result<String> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("report.md", REPORT_TEMPLATE)?;

    let rate_rows = |rates: &std::collections::BTreeMap<String, PassRate>| -> Vec<RateRow> {
        rates
            .iter()
            .map(|(name, rate)| RateRow {
                name: name.clone(),
                rate: format_rate(rate),
            })
            .collect()
    };
    let pairings: Vec<PairingRow> = metrics
        .pairings
        .iter()
        .map(|pairing| PairingRow {
            task: pairing.task.clone(),
            strategy: pairing.strategy.clone(),
            result: if pairing.passed { "PASS" } else { "FAIL" },
            attempts_to_success: format_attempts_to_success(pairing.attempts_to_success),
            total_attempts: pairing.total_attempts,
            latency_ms: pairing.latency_ms,
        })
        .collect();

    let mut rendered = env.get_template("report.md")?.render(context! {
        run => run,
        by_task => rate_rows(&metrics.by_task),
        by_strategy => rate_rows(&metrics.by_strategy),
        pairings => pairings,
        total_attempts => metrics.total_attempts,
        total_latency => format!("{} ms", metrics.total_latency_ms),
        avg_latency => metrics
            .avg_latency_ms
            .map_or_else(|| "N/A".to_string(), |avg| format!("{avg:.0} ms")),
    })?;
    rendered.push('\n');
    Ok(rendered)
}

pub fn render_csv(attempts: &[AttemptRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for attempt in attempts {
        writer
            .serialize(CsvRow {
                run_id: &attempt.run_id,
                task_name: &attempt.task_name,
                strategy_name: &attempt.strategy_name,
                attempt_num: attempt.attempt_num,
                success: attempt.success,
                score: attempt.score,
                latency_ms: attempt.latency_ms,
                error_type: attempt.error_kind.map_or("", |kind| kind.as_str()),
                artifact_dir: &attempt.artifact_dir,
                created_at: &attempt.created_at,
            })
            .context("serialize csv row")?;
    }
    if attempts.is_empty() {
        writer
            .write_record([
                "run_id",
                "task_name",
                "strategy_name",
                "attempt_num",
                "success",
                "score",
                "latency_ms",
                "error_type",
                "artifact_dir",
                "created_at",
            ])
            .context("write csv header")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("flush csv: {}", err.error()))?;
    String::from_utf8(bytes).context("csv is not utf-8")
}

/// Plain-text table printed at the end of `gauntlet run`.
pub fn format_summary_table(metrics: &RunMetrics) -> String {
    let task_width = metrics
        .pairings
        .iter()
        .map(|p| p.task.len())
        .chain(["TASK".len()])
        .max()
        .unwrap_or(4);
    let strategy_width = metrics
        .pairings
        .iter()
        .map(|p| p.strategy.len())
        .chain(["STRATEGY".len()])
        .max()
        .unwrap_or(8);

    let mut out = format!(
        "{:<task_width$}  {:<strategy_width$}  {:<6}  {:<10}  {:>8}\n",
        "TASK", "STRATEGY", "RESULT", "SUCCESS@", "ATTEMPTS"
    );
    for pairing in &metrics.pairings {
        out.push_str(&format!(
            "{:<task_width$}  {:<strategy_width$}  {:<6}  {:<10}  {:>8}\n",
            pairing.task,
            pairing.strategy,
            if pairing.passed { "PASS" } else { "FAIL" },
            format_attempts_to_success(pairing.attempts_to_success),
            pairing.total_attempts,
        ));
    }
    out
}

fn format_rate(rate: &PassRate) -> String {
    format!("{:.0}% ({}/{})", rate.percent(), rate.passed, rate.total)
}

fn format_attempts_to_success(attempts: Option<u32>) -> String {
    attempts.map_or_else(|| "unresolved".to_string(), |n| n.to_string())
}
