//! One-shot strategy: a single attempt with the task's base prompt.

use anyhow::Result;

use super::{PriorAttempt, Strategy};
use crate::core::types::Message;
use crate::tasks::Task;

#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineStrategy;

impl Strategy for BaselineStrategy {
    fn name(&self) -> &str {
        "baseline"
    }

    fn supports_retry(&self) -> bool {
        false
    }

    fn next_prompt(
        &self,
        task: &dyn Task,
        _previous: Option<PriorAttempt<'_>>,
    ) -> Result<Vec<Message>> {
        Ok(task.prompt())
    }
}
