//! Binary-level checks for commands that need no model endpoint.

use std::process::Command;

#[test]
fn list_prints_registries() {
    let output = Command::new(env!("CARGO_BIN_EXE_gauntlet"))
        .arg("list")
        .output()
        .expect("run gauntlet list");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("json_schema"));
    assert!(stdout.contains("pyfunc"));
    assert!(stdout.contains("critique_fix"));
    assert!(stdout.contains("one-shot"));
}

#[test]
fn run_rejects_unknown_task_before_calling_model() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_gauntlet"))
        .current_dir(temp.path())
        .args(["run", "--tasks", "json,sql", "--base-url", "http://127.0.0.1:9/v1"])
        .output()
        .expect("run gauntlet run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("sql"), "stderr: {stderr}");
    assert!(!temp.path().join("runs").exists());
}

#[test]
fn report_for_missing_database_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = Command::new(env!("CARGO_BIN_EXE_gauntlet"))
        .current_dir(temp.path())
        .args(["report", "20260101_120000"])
        .output()
        .expect("run gauntlet report");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}
