//! Artifact layout under `runs/<run_id>/`.
//!
//! ```text
//! runs/<run_id>/
//!   run.json                        run metadata + config snapshot
//!   report.md, results.csv          written after the last pairing
//!   <task>_<strategy>/attempt_<n>/
//!     prompt.json                   rendered messages sent to the model
//!     response_text.txt             model text verbatim
//!     raw_response.json             full payload (or the caller fault)
//!     checker_stdout.txt            only when a checker ran
//!     checker_stderr.txt            only when a checker ran
//!     eval_result.json              written last; marks the attempt complete
//! ```
//!
//! Every file is written to a temporary sibling and renamed into place, so an
//! interrupted run never leaves a truncated file behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::Value;

use crate::core::types::{EvalResult, Message, RunRecord};
use crate::io::config::GauntletConfig;

pub fn run_root(runs_dir: &Path, run_id: &str) -> PathBuf {
    runs_dir.join(run_id)
}

/// Refuse a run root that already holds pairing directories.
///
/// Attempt directories from another run would sit beside the new attempts and
/// contradict the new rows. A root with only `run.json` or reports is fine.
pub fn ensure_unused_run_root(run_root: &Path) -> Result<()> {
    if !run_root.exists() {
        return Ok(());
    }
    let entries =
        fs::read_dir(run_root).with_context(|| format!("read run root {}", run_root.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read run root {}", run_root.display()))?;
        if entry.file_type()?.is_dir() {
            bail!(
                "run root {} already contains attempt artifacts ({}); choose another run id",
                run_root.display(),
                entry.file_name().to_string_lossy()
            );
        }
    }
    Ok(())
}

pub fn pairing_dir(run_root: &Path, task: &str, strategy: &str) -> PathBuf {
    run_root.join(format!("{task}_{strategy}"))
}

pub fn attempt_dir(pairing_dir: &Path, attempt_num: u32) -> PathBuf {
    pairing_dir.join(format!("attempt_{attempt_num}"))
}

#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub prompt: PathBuf,
    pub response_text: PathBuf,
    pub raw_response: PathBuf,
    pub checker_stdout: PathBuf,
    pub checker_stderr: PathBuf,
    pub eval_result: PathBuf,
}

impl AttemptPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prompt: dir.join("prompt.json"),
            response_text: dir.join("response_text.txt"),
            raw_response: dir.join("raw_response.json"),
            checker_stdout: dir.join("checker_stdout.txt"),
            checker_stderr: dir.join("checker_stderr.txt"),
            eval_result: dir.join("eval_result.json"),
        }
    }
}

/// Evidence captured for one attempt.
pub struct AttemptArtifacts<'a> {
    pub prompt: &'a [Message],
    pub response_text: &'a str,
    pub raw_response: &'a Value,
    pub eval: &'a EvalResult,
}

pub fn write_attempt(dir: &Path, artifacts: &AttemptArtifacts<'_>) -> Result<AttemptPaths> {
    let paths = AttemptPaths::new(dir);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create attempt dir {}", paths.dir.display()))?;

    write_json(&paths.prompt, &artifacts.prompt)?;
    write_text(&paths.response_text, artifacts.response_text)?;
    write_json(&paths.raw_response, artifacts.raw_response)?;
    if let Some(checker) = &artifacts.eval.diagnostic.checker {
        write_text(&paths.checker_stdout, &checker.stdout)?;
        write_text(&paths.checker_stderr, &checker.stderr)?;
    }
    write_json(&paths.eval_result, artifacts.eval)?;

    Ok(paths)
}

#[derive(Debug, Serialize)]
struct RunMeta<'a> {
    run: &'a RunRecord,
    config: &'a GauntletConfig,
    config_sha256: String,
}

/// Write `run.json`: run metadata, effective config and its digest.
pub fn write_run_meta(
    run_root: &Path,
    run: &RunRecord,
    config: &GauntletConfig,
) -> Result<PathBuf> {
    let path = run_root.join("run.json");
    let meta = RunMeta {
        run,
        config,
        config_sha256: config.digest()?,
    };
    write_json(&path, &meta)?;
    Ok(path)
}

pub(crate) fn write_text(path: &Path, contents: &str) -> Result<()> {
    let file_name = path
        .file_name()
        .with_context(|| format!("artifact path missing file name {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CheckerOutput, ErrorKind};

    #[test]
    fn layout_is_deterministic() {
        let root = run_root(Path::new("runs"), "20260101_120000");
        let pairing = pairing_dir(&root, "json_schema", "critique_fix");
        let paths = AttemptPaths::new(&attempt_dir(&pairing, 2));

        assert_eq!(
            paths.dir,
            Path::new("runs/20260101_120000/json_schema_critique_fix/attempt_2")
        );
        assert!(paths.prompt.ends_with("prompt.json"));
        assert!(paths.response_text.ends_with("response_text.txt"));
        assert!(paths.raw_response.ends_with("raw_response.json"));
        assert!(paths.eval_result.ends_with("eval_result.json"));
    }

    #[test]
    fn run_root_with_pairing_dirs_is_refused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = run_root(temp.path(), "r1");
        ensure_unused_run_root(&root).expect("missing root is fine");

        fs::create_dir_all(&root).expect("mkdir");
        fs::write(root.join("run.json"), "{}").expect("write");
        ensure_unused_run_root(&root).expect("metadata only is fine");

        fs::create_dir_all(attempt_dir(&pairing_dir(&root, "pyfunc", "baseline"), 1))
            .expect("mkdir");
        let err = ensure_unused_run_root(&root).expect_err("stale pairing dir");
        assert!(err.to_string().contains("pyfunc_baseline"));
    }

    #[test]
    fn writes_failed_attempt_with_checker_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("pyfunc_baseline").join("attempt_1");
        let prompt = vec![Message::system("sys"), Message::user("task")];
        let eval = EvalResult::fail(ErrorKind::TestFailure, "1 failed").with_checker(CheckerOutput {
            exit_code: Some(1),
            stdout: "FAILED test_basic\n".to_string(),
            ..CheckerOutput::default()
        });

        let paths = write_attempt(
            &dir,
            &AttemptArtifacts {
                prompt: &prompt,
                response_text: "def normalize_phone(s): pass",
                raw_response: &serde_json::json!({"choices": []}),
                eval: &eval,
            },
        )
        .expect("write");

        let stdout = fs::read_to_string(&paths.checker_stdout).expect("stdout");
        assert_eq!(stdout, "FAILED test_basic\n");
        assert!(paths.checker_stderr.is_file());
        let saved: EvalResult =
            serde_json::from_str(&fs::read_to_string(&paths.eval_result).expect("eval"))
                .expect("parse eval");
        assert_eq!(saved, eval);
        let saved_prompt: Vec<Message> =
            serde_json::from_str(&fs::read_to_string(&paths.prompt).expect("prompt"))
                .expect("parse prompt");
        assert_eq!(saved_prompt, prompt);
        assert!(!dir.join("eval_result.json.tmp").exists());
    }

    #[test]
    fn checker_files_are_omitted_without_checker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = write_attempt(
            temp.path(),
            &AttemptArtifacts {
                prompt: &[],
                response_text: "",
                raw_response: &Value::Null,
                eval: &EvalResult::pass(),
            },
        )
        .expect("write");

        assert_eq!(fs::read_to_string(&paths.response_text).expect("text"), "");
        assert!(!paths.checker_stdout.exists());
        assert!(!paths.checker_stderr.exists());
    }

    #[test]
    fn run_meta_records_config_digest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = GauntletConfig::default();
        let run = RunRecord {
            run_id: "r1".to_string(),
            started_at: "2026-01-01T00:00:00Z".to_string(),
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            git_commit: None,
        };
        let path = write_run_meta(temp.path(), &run, &config).expect("write");

        let value: Value =
            serde_json::from_str(&fs::read_to_string(path).expect("read")).expect("parse");
        assert_eq!(value["run"]["run_id"], "r1");
        assert_eq!(value["config"]["max_attempts"], 3);
        assert_eq!(value["config_sha256"], config.digest().expect("digest"));
    }
}
