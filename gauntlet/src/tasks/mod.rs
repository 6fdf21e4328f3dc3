//! Tasks: a prompt plus a mechanical evaluator.
//!
//! Available tasks are a closed set selected by key:
//!
//! | key      | name          | checks                                          |
//! |----------|---------------|-------------------------------------------------|
//! | `json`   | `json_schema` | JSON parse + schema validation                  |
//! | `pyfunc` | `pyfunc`      | Python function extraction + check-suite run    |

use std::path::Path;

use anyhow::{Result, bail};

use crate::core::types::{ErrorKind, EvalResult, Message};
use crate::io::config::CheckerConfig;

pub mod json_schema;
pub mod pyfunc;

pub use json_schema::JsonSchemaTask;
pub use pyfunc::PyFuncTask;

/// System instruction shared by every task's base prompt.
pub const BASE_SYSTEM_PROMPT: &str = "You are a precise coding assistant. Follow instructions exactly.";

/// Selection keys accepted by `--tasks`, in registry order.
pub const TASK_KEYS: [&str; 2] = ["json", "pyfunc"];

/// A mechanically checkable task.
pub trait Task {
    /// Stable name used in artifact paths and attempt rows.
    fn name(&self) -> &str;

    /// Base prompt. Deterministic and independent of prior attempts.
    fn prompt(&self) -> Vec<Message>;

    /// Score `response_text`, using only `scratch_dir` for files.
    ///
    /// Never fails: checker faults are reported as a failing result.
    fn evaluate(&self, response_text: &str, scratch_dir: &Path) -> EvalResult;
}

/// Instantiate the task registered under `key`.
pub fn build_task(key: &str, checker: &CheckerConfig) -> Result<Box<dyn Task>> {
    match key {
        "json" => Ok(Box::new(JsonSchemaTask::new())),
        "pyfunc" => Ok(Box::new(PyFuncTask::new(checker.clone()))),
        other => bail!(
            "unknown task '{other}' (available: {})",
            TASK_KEYS.join(", ")
        ),
    }
}

/// Turn an evaluator fault into a failing result so it never crosses the task boundary.
pub(crate) fn downgrade_fault(result: Result<EvalResult>) -> EvalResult {
    result.unwrap_or_else(|err| {
        tracing::warn!(err = %format!("{err:#}"), "evaluator fault");
        EvalResult::fail(ErrorKind::CheckerFailure, format!("evaluator fault: {err:#}"))
    })
}
