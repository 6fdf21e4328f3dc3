//! Executable-code task: write `normalize_phone` in Python, verified by a check suite.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, instrument};

use super::{BASE_SYSTEM_PROMPT, Task, downgrade_fault};
use crate::core::extract::extract_function;
use crate::core::types::{CheckerOutput, ErrorKind, EvalResult, Message};
use crate::io::config::CheckerConfig;
use crate::io::process::run_command_with_timeout;

pub const TASK_NAME: &str = "pyfunc";
pub const FUNCTION_NAME: &str = "normalize_phone";
pub const SIGNATURE: &str = "def normalize_phone(s: str) -> str:";

const CHECK_SUITE: &str = include_str!("pyfunc_checks.py");
const SYNTAX_CHECK: &str = "import ast, sys\nwith open(sys.argv[1], encoding='utf-8') as f:\n    ast.parse(f.read(), filename=sys.argv[1])\n";
const SOLUTION_FILE: &str = "solution.py";
const CHECKS_FILE: &str = "test_solution.py";

const PROMPT: &str = "Write a Python function with this exact signature:

def normalize_phone(s: str) -> str:

Requirements:
1. Strip all non-digit characters from the input
2. If the result is exactly 10 digits, format as AAA-BBB-CCCC
3. If the result is exactly 11 digits AND starts with '1', drop the leading '1' and format as AAA-BBB-CCCC
4. Otherwise, raise a ValueError

Return ONLY the function definition. No explanations, no examples, no imports, no markdown code fences - just the raw Python function.";

pub struct PyFuncTask {
    checker: CheckerConfig,
}

impl PyFuncTask {
    pub fn new(checker: CheckerConfig) -> Self {
        Self { checker }
    }

    fn python(&self, scratch_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.checker.python);
        cmd.current_dir(scratch_dir)
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env_remove("PYTHONPATH");
        cmd
    }

    fn run(&self, cmd: Command) -> Result<CheckerOutput> {
        let output = run_command_with_timeout(
            cmd,
            Duration::from_secs(self.checker.timeout_secs),
            self.checker.output_limit_bytes,
        )
        .with_context(|| format!("run checker '{}'", self.checker.python))?;
        Ok(output.into_checker_output())
    }

    fn check(&self, response_text: &str, scratch_dir: &Path) -> Result<EvalResult> {
        fs::create_dir_all(scratch_dir)
            .with_context(|| format!("create scratch dir {}", scratch_dir.display()))?;

        let Some(extraction) = extract_function(response_text, FUNCTION_NAME, SIGNATURE) else {
            return Ok(EvalResult::fail(
                ErrorKind::ExtractionFailure,
                format!("Could not locate a `{FUNCTION_NAME}` definition or function body in the response"),
            ));
        };
        let data = json!({ "extraction": extraction.method });
        let solution_path = scratch_dir.join(SOLUTION_FILE);
        fs::write(&solution_path, &extraction.code)
            .with_context(|| format!("write {}", solution_path.display()))?;

        let mut syntax_cmd = self.python(scratch_dir);
        syntax_cmd.arg("-c").arg(SYNTAX_CHECK).arg(SOLUTION_FILE);
        let syntax = self.run(syntax_cmd)?;
        if syntax.exit_code != Some(0) {
            let result = match (syntax.timed_out, syntax.exit_code) {
                (true, _) => EvalResult::fail(
                    ErrorKind::Timeout,
                    format!("Syntax check timed out after {}s", self.checker.timeout_secs),
                ),
                (false, Some(_)) => EvalResult::fail(
                    ErrorKind::ExtractionFailure,
                    format!(
                        "Extracted code is not valid Python:\n{}",
                        last_line(&syntax.stderr)
                    ),
                ),
                (false, None) => EvalResult::fail(
                    ErrorKind::CheckerFailure,
                    "Syntax check was terminated by a signal",
                ),
            };
            return Ok(result.with_checker(syntax).with_data(data));
        }

        let checks_path = scratch_dir.join(CHECKS_FILE);
        fs::write(&checks_path, CHECK_SUITE)
            .with_context(|| format!("write {}", checks_path.display()))?;
        let mut suite_cmd = self.python(scratch_dir);
        suite_cmd.arg(CHECKS_FILE);
        let suite = self.run(suite_cmd)?;
        debug!(exit_code = ?suite.exit_code, timed_out = suite.timed_out, "check suite finished");

        let result = match (suite.timed_out, suite.exit_code) {
            (true, _) => EvalResult::fail(
                ErrorKind::Timeout,
                format!("Check suite timed out after {}s", self.checker.timeout_secs),
            ),
            (false, Some(0)) => EvalResult::pass(),
            (false, Some(code)) => EvalResult::fail(
                ErrorKind::TestFailure,
                format!(
                    "Check suite failed (exit {code}):\n{}",
                    failure_summary(&suite.stdout)
                ),
            ),
            (false, None) => EvalResult::fail(
                ErrorKind::CheckerFailure,
                "Check suite was terminated by a signal",
            ),
        };
        Ok(result.with_checker(suite).with_data(data))
    }
}

impl Task for PyFuncTask {
    fn name(&self) -> &str {
        TASK_NAME
    }

    fn prompt(&self) -> Vec<Message> {
        vec![Message::system(BASE_SYSTEM_PROMPT), Message::user(PROMPT)]
    }

    #[instrument(skip_all, fields(task = TASK_NAME))]
    fn evaluate(&self, response_text: &str, scratch_dir: &Path) -> EvalResult {
        downgrade_fault(self.check(response_text, scratch_dir))
    }
}

/// Failing check names and assertion messages from the suite's stdout.
fn failure_summary(stdout: &str) -> String {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with("FAILED ")
                || line.starts_with("ERROR ")
                || (line.contains("Error") && line.contains(": "))
        })
        .collect();
    if lines.is_empty() {
        "(no failure details captured)".to_string()
    } else {
        lines.join("\n")
    }
}

fn last_line(text: &str) -> &str {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("(no output)")
}
