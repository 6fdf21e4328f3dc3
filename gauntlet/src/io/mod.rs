//! I/O collaborators for harness commands.

pub mod artifacts;
pub mod config;
pub mod git;
pub mod process;
pub mod provider;
pub mod report;
pub mod store;
