// SPDX-License-Identifier: MIT

//! Step handlers - one per non-terminal task
//!
//! Every handler builds bounded oracle input, calls the oracle, validates the
//! reply and returns a [`StatePatch`]. Errors never escape a handler: the
//! provided [`StepHandler::execute`] turns them into a failure patch.

mod analyze;
mod decide;
mod edit;
mod review;

pub use analyze::AnalyzeHandler;
pub use decide::DecideHandler;
pub use edit::EditHandler;
pub use review::ReviewHandler;

use crate::adk::error::Result;
use crate::adk::oracle::Oracle;
use crate::adk::tokens::TokenBudgeter;
use crate::resolve::config::WorkflowSettings;
use crate::resolve::state::{StatePatch, WorkflowState};
use crate::resolve::types::{Chunk, TaskType};
use async_trait::async_trait;
use std::sync::Arc;

/// Collaborators shared by all handlers of a run
#[derive(Clone)]
pub struct HandlerContext {
    pub oracle: Arc<dyn Oracle>,
    pub budgeter: Arc<TokenBudgeter>,
    pub settings: Arc<WorkflowSettings>,
}

impl HandlerContext {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        budgeter: Arc<TokenBudgeter>,
        settings: Arc<WorkflowSettings>,
    ) -> Self {
        Self {
            oracle,
            budgeter,
            settings,
        }
    }

    /// Token count of `text` as a state delta
    pub fn tokens(&self, text: &str) -> u64 {
        self.budgeter.count(text) as u64
    }

    /// Patch recording a handler failure: back to decide, reason set, penalty charged
    pub fn failure_patch(&self, reason: impl Into<String>) -> StatePatch {
        StatePatch::next(TaskType::Decide)
            .with_failure(reason)
            .with_tokens(self.settings.token_penalty)
    }

    /// Retrieved chunks as one bounded context block
    pub fn format_code_context(&self, docs: &[Chunk]) -> String {
        let context = if docs.is_empty() {
            "No relevant code context found".to_string()
        } else {
            docs.iter()
                .map(|doc| {
                    format!(
                        "### {}\n{}",
                        doc.source,
                        self.budgeter.truncate(&doc.content, 500, Some(2000))
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        self.budgeter.truncate(
            &context,
            self.settings.max_context_tokens / 2,
            Some(self.settings.max_content_length / 4),
        )
    }

    /// The last two entries of a history, each clamped, or `empty` if none
    pub fn format_attempts(&self, history: &[String], empty: &str) -> String {
        if history.is_empty() {
            return empty.to_string();
        }
        let start = history.len().saturating_sub(2);
        history[start..]
            .iter()
            .enumerate()
            .map(|(i, a)| format!("Attempt {}: {}", start + i + 1, self.budgeter.truncate(a, 200, None)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A unit of work the router dispatches for one task
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Task this handler serves
    fn task(&self) -> TaskType;

    fn context(&self) -> &HandlerContext;

    /// Build the patch for `state`; errors become failure patches in [`execute`](Self::execute)
    async fn run(&self, state: &WorkflowState) -> Result<StatePatch>;

    /// Run the handler, converting any error into a failure patch
    async fn execute(&self, state: &WorkflowState) -> StatePatch {
        match self.run(state).await {
            Ok(patch) => patch,
            Err(e) => {
                let reason = format!("{} step failed: {}", self.task(), e);
                log::warn!("[{}] {}", state.instance_id, reason);
                self.context().failure_patch(reason)
            }
        }
    }
}
