//! Pure, deterministic logic shared by tasks, strategies and reporting.

pub mod extract;
pub mod feedback;
pub mod metrics;
pub mod types;
