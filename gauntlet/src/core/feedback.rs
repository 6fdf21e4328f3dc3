//! Corrective prompt construction for feedback-driven retries.

use anyhow::Result;
use minijinja::{Environment, context};

use super::types::{EvalResult, Message, Role};

const FEEDBACK_TEMPLATE: &str = include_str!("prompts/feedback.md");

/// System instruction for every corrective attempt.
pub const FIX_SYSTEM_PROMPT: &str = "You are a precise coding assistant. Fix the error and return ONLY the corrected output. No explanations or commentary.";

const EMPTY_PLACEHOLDER: &str = "(empty)";

fn or_placeholder(text: &str) -> &str {
    if text.trim().is_empty() {
        EMPTY_PLACEHOLDER
    } else {
        text
    }
}

/// Build the corrective prompt for the attempt following a failed one.
///
/// The user message carries the original task instructions, the previous
/// response verbatim, the error kind and diagnostic text, and any checker
/// output. Deterministic for identical inputs.
pub fn render_feedback_prompt(
    task_prompt: &[Message],
    previous_response: &str,
    eval: &EvalResult,
) -> Result<Vec<Message>> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template("feedback", FEEDBACK_TEMPLATE)?;

    let task = task_prompt
        .iter()
        .filter(|message| message.role == Role::User)
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let checker = eval.diagnostic.checker.as_ref();
    let error_kind = eval.error_kind.map_or("unknown", |kind| kind.as_str());

    let rendered = env.get_template("feedback")?.render(context! {
        task => or_placeholder(&task),
        previous_response => or_placeholder(previous_response),
        error_kind => error_kind,
        message => or_placeholder(&eval.diagnostic.message),
        checker_stdout => checker.map(|c| c.stdout.trim_end()).filter(|s| !s.trim().is_empty()),
        checker_stderr => checker.map(|c| c.stderr.trim_end()).filter(|s| !s.trim().is_empty()),
    })?;

    Ok(vec![Message::system(FIX_SYSTEM_PROMPT), Message::user(rendered)])
}
