//! Run metrics derived purely from persisted attempt rows.

use std::collections::BTreeMap;

use serde::Serialize;

use super::types::AttemptRecord;

/// Pass counter for a group of pairings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassRate {
    pub passed: usize,
    pub total: usize,
}

impl PassRate {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.passed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Aggregate of all attempts recorded for one task x strategy pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairingSummary {
    pub task: String,
    pub strategy: String,
    pub passed: bool,
    /// Attempt number of the first successful row; `None` means unresolved.
    pub attempts_to_success: Option<u32>,
    pub total_attempts: usize,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    /// Sorted by task, then strategy.
    pub pairings: Vec<PairingSummary>,
    pub by_task: BTreeMap<String, PassRate>,
    pub by_strategy: BTreeMap<String, PassRate>,
    pub total_attempts: usize,
    pub total_latency_ms: u64,
    pub avg_latency_ms: Option<f64>,
}

/// Reconstruct per-pairing outcomes and pass rates by counting rows.
///
/// Pass rates count pairings, not attempts: a pairing that succeeded on its
/// third attempt counts as one pass.
pub fn compute_metrics(attempts: &[AttemptRecord]) -> RunMetrics {
    let mut grouped: BTreeMap<(&str, &str), Vec<&AttemptRecord>> = BTreeMap::new();
    for attempt in attempts {
        grouped
            .entry((attempt.task_name.as_str(), attempt.strategy_name.as_str()))
            .or_default()
            .push(attempt);
    }

    let mut metrics = RunMetrics::default();
    for ((task, strategy), rows) in grouped {
        let attempts_to_success = rows
            .iter()
            .filter(|row| row.success)
            .map(|row| row.attempt_num)
            .min();
        let summary = PairingSummary {
            task: task.to_string(),
            strategy: strategy.to_string(),
            passed: attempts_to_success.is_some(),
            attempts_to_success,
            total_attempts: rows.len(),
            latency_ms: rows.iter().map(|row| row.latency_ms).sum(),
        };

        for rate in [
            metrics.by_task.entry(task.to_string()).or_default(),
            metrics.by_strategy.entry(strategy.to_string()).or_default(),
        ] {
            rate.total += 1;
            if summary.passed {
                rate.passed += 1;
            }
        }
        metrics.pairings.push(summary);
    }

    metrics.total_attempts = attempts.len();
    metrics.total_latency_ms = attempts.iter().map(|a| a.latency_ms).sum();
    metrics.avg_latency_ms = (!attempts.is_empty())
        .then(|| metrics.total_latency_ms as f64 / attempts.len() as f64);
    metrics
}
