//! Evaluation harness measuring how reliably a model satisfies mechanically
//! checkable tasks, and whether feedback-driven retries improve the pass rate.
//!
//! The crate keeps the same split as the rest of the workspace:
//!
//! - **[`core`]**: Pure, deterministic logic (data model, code extraction,
//!   feedback prompt rendering, report metrics). No I/O.
//! - **[`io`]**: Side-effecting collaborators (config files, the model endpoint,
//!   checker subprocesses, artifact files, SQLite, reports).
//!
//! [`tasks`] and [`strategies`] hold the two pluggable capabilities, and
//! [`orchestrator`] binds them together for every task x strategy pairing.

pub mod cli;
pub mod core;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod strategies;
pub mod tasks;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
