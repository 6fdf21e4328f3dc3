//! Feedback-retry strategy: each failed attempt is fed back with its diagnostic.

use anyhow::Result;

use super::{PriorAttempt, Strategy};
use crate::core::feedback::render_feedback_prompt;
use crate::core::types::Message;
use crate::tasks::Task;

#[derive(Debug, Clone, Copy, Default)]
pub struct CritiqueFixStrategy;

impl Strategy for CritiqueFixStrategy {
    fn name(&self) -> &str {
        "critique_fix"
    }

    fn supports_retry(&self) -> bool {
        true
    }

    fn next_prompt(
        &self,
        task: &dyn Task,
        previous: Option<PriorAttempt<'_>>,
    ) -> Result<Vec<Message>> {
        match previous {
            None => Ok(task.prompt()),
            Some(prior) => render_feedback_prompt(&task.prompt(), prior.response_text, prior.eval),
        }
    }
}
