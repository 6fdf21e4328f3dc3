//! Provenance lookup via `git`.

use std::path::Path;
use std::process::Command;

use tracing::debug;

/// `git rev-parse HEAD` in `workdir`, or `None` outside a repository or without git.
pub fn head_commit(workdir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(workdir)
        .output()
        .ok()?;
    if !output.status.success() {
        debug!(
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "git rev-parse failed"
        );
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}
