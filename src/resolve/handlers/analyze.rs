// SPDX-License-Identifier: MIT

//! Analyze - root-cause analysis over the retrieved context

use super::{HandlerContext, StepHandler};
use crate::adk::error::Result;
use crate::resolve::prompts::{AnalysisPrompt, ANALYSIS_VALIDATION_SYSTEM};
use crate::resolve::state::{StatePatch, WorkflowState};
use crate::resolve::types::TaskType;
use crate::resolve::validate::{extract_key_points, is_valid_verdict};
use async_trait::async_trait;

pub struct AnalyzeHandler {
    ctx: HandlerContext,
}

impl AnalyzeHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    fn summarize_previous(&self, history: &[String]) -> String {
        if history.is_empty() {
            return "No previous analysis available".to_string();
        }
        let start = history.len().saturating_sub(2);
        history[start..]
            .iter()
            .enumerate()
            .map(|(i, a)| format!("Attempt {}: {}", start + i + 1, extract_key_points(a)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Edit once this attempt reaches the ceiling, otherwise decide again
    fn next_task(&self, attempts_before: u32) -> TaskType {
        if attempts_before + 1 >= self.ctx.settings.analysis_attempt_ceiling {
            TaskType::Edit
        } else {
            TaskType::Decide
        }
    }
}

#[async_trait]
impl StepHandler for AnalyzeHandler {
    fn task(&self) -> TaskType {
        TaskType::Analyze
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn run(&self, state: &WorkflowState) -> Result<StatePatch> {
        let settings = &self.ctx.settings;
        let budgeter = &self.ctx.budgeter;

        let problem = budgeter.truncate(
            &state.problem_stmt,
            200,
            Some(settings.max_content_length / 8),
        );
        let code_context = self.ctx.format_code_context(&state.retrieved_docs);
        let previous = self.summarize_previous(&state.analysis_history);
        let feedback = budgeter.truncate(&state.review_feedback, 200, None);

        let prompt = AnalysisPrompt {
            problem: &problem,
            code_context: &code_context,
            previous_analysis: &previous,
            review_feedback: &feedback,
            attempts_left: settings
                .analysis_attempt_ceiling
                .saturating_sub(state.analysis_attempts),
        }
        .render();

        let analysis = self.ctx.oracle.invoke(&prompt, None).await?;
        let verdict = self
            .ctx
            .oracle
            .invoke(ANALYSIS_VALIDATION_SYSTEM, Some(&analysis))
            .await?;

        let next = self.next_task(state.analysis_attempts);
        let patch = StatePatch {
            analysis_attempts: Some(1),
            ..StatePatch::next(next)
        }
        .with_tokens(self.ctx.tokens(&analysis));

        if !is_valid_verdict(&verdict) {
            log::warn!(
                "[{}] analysis attempt {} rejected by validation",
                state.instance_id,
                state.analysis_attempts + 1
            );
            return Ok(patch);
        }

        log::info!(
            "[{}] analysis attempt {} accepted, next: {}",
            state.instance_id,
            state.analysis_attempts + 1,
            next
        );
        Ok(StatePatch {
            analysis: Some(analysis.clone()),
            analysis_history: Some(vec![analysis]),
            ..patch
        })
    }
}
