//! Registered tasks driven through the full pipeline with scripted model replies.

use std::process::Command;

use gauntlet::core::types::ErrorKind;
use gauntlet::io::artifacts::AttemptPaths;
use gauntlet::io::config::GauntletConfig;
use gauntlet::io::store::AttemptSink;
use gauntlet::orchestrator::{PairingStatus, RunPlan, RunSummary, run_gauntlet};
use gauntlet::test_support::{MemorySink, RunFixture, ScriptedCaller, text_response};

fn run(
    fixture: &RunFixture,
    plan: &RunPlan,
    caller: &ScriptedCaller,
    sink: &mut dyn AttemptSink,
) -> anyhow::Result<RunSummary> {
    run_gauntlet(&fixture.run, plan, caller, sink, &fixture.runs_dir(), |_| {})
}

fn plan_for(task: &str, strategy: &str, max_attempts: u32) -> RunPlan {
    let cfg = GauntletConfig {
        tasks: vec![task.to_string()],
        strategies: vec![strategy.to_string()],
        max_attempts,
        ..GauntletConfig::default()
    };
    RunPlan::from_config(&cfg).expect("plan")
}

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

#[test]
fn json_task_recovers_from_missing_field() {
    let fixture = RunFixture::new("json-recover");
    let plan = plan_for("json", "critique_fix", 3);
    let caller = ScriptedCaller::new([
        text_response(r#"{"name": "Ann", "age": 30}"#),
        text_response("```json\n{\"name\": \"Ann\", \"age\": 30, \"city\": \"Lake\"}\n```"),
    ]);
    let mut sink = MemorySink::default();

    let summary = run(&fixture, &plan, &caller, &mut sink).expect("run");

    assert_eq!(summary.pairings[0].status, PairingStatus::Passed { attempt: 2 });
    let rows = sink.attempts_for("json_schema", "critique_fix");
    assert_eq!(rows[0].error_kind, Some(ErrorKind::SchemaError));
    assert!(rows[1].success);
    assert!(caller.requests()[1][1].content.contains("city"));

    // run.json snapshot comes from the plan's config.
    let meta = std::fs::read_to_string(summary.run_root.join("run.json")).expect("run.json");
    let meta: serde_json::Value = serde_json::from_str(&meta).expect("json");
    assert_eq!(meta["run"]["run_id"], "json-recover");
    assert_eq!(meta["config"]["max_attempts"], 3);
    assert_eq!(meta["config_sha256"].as_str().map(str::len), Some(64));
}

#[test]
fn json_task_prose_is_a_parse_error() {
    let fixture = RunFixture::new("json-prose");
    let plan = plan_for("json", "baseline", 3);
    let caller = ScriptedCaller::new([text_response("Sure! Here is a person: Ann, 30, Lake.")]);
    let mut sink = MemorySink::default();

    let summary = run(&fixture, &plan, &caller, &mut sink).expect("run");

    assert_eq!(
        summary.pairings[0].status,
        PairingStatus::Failed {
            last_error: Some(ErrorKind::JsonParseError)
        }
    );
    let eval = std::fs::read_to_string(
        AttemptPaths::new(&fixture.attempt_dir("json_schema", "baseline", 1)).eval_result,
    )
    .expect("eval_result.json");
    assert!(eval.contains("json_parse_error"));
}

#[test]
fn pyfunc_task_passes_correct_implementation() {
    if !python_available() {
        eprintln!("skipping: python3 not available");
        return;
    }
    let fixture = RunFixture::new("pyfunc-pass");
    let plan = plan_for("pyfunc", "baseline", 1);
    let solution = "```python\nimport re\n\ndef normalize_phone(s: str) -> str:\n    digits = re.sub(r\"\\D\", \"\", s)\n    if len(digits) == 11 and digits[0] == \"1\":\n        digits = digits[1:]\n    if len(digits) != 10:\n        raise ValueError(\"invalid phone number\")\n    return f\"{digits[:3]}-{digits[3:6]}-{digits[6:]}\"\n```";
    let caller = ScriptedCaller::new([text_response(solution)]);
    let mut sink = MemorySink::default();

    let summary = run(&fixture, &plan, &caller, &mut sink).expect("run");

    assert_eq!(summary.pairings[0].status, PairingStatus::Passed { attempt: 1 });
    let paths = AttemptPaths::new(&fixture.attempt_dir("pyfunc", "baseline", 1));
    assert!(paths.checker_stdout.is_file());
}

#[test]
fn pyfunc_task_feeds_failing_checks_back() {
    if !python_available() {
        eprintln!("skipping: python3 not available");
        return;
    }
    let fixture = RunFixture::new("pyfunc-fail");
    let plan = plan_for("pyfunc", "critique_fix", 2);
    let caller = ScriptedCaller::new([
        text_response("def normalize_phone(s: str) -> str:\n    return s\n"),
        text_response("def normalize_phone(s: str) -> str:\n    return s\n"),
    ]);
    let mut sink = MemorySink::default();

    let summary = run(&fixture, &plan, &caller, &mut sink).expect("run");

    assert_eq!(
        summary.pairings[0].status,
        PairingStatus::Failed {
            last_error: Some(ErrorKind::TestFailure)
        }
    );
    let feedback = &caller.requests()[1][1].content;
    assert!(feedback.contains("test_failure"));
    assert!(feedback.contains("FAILED"));
}
