// SPDX-License-Identifier: MIT

//! Review - judges the generated patch

use super::{HandlerContext, StepHandler};
use crate::adk::error::Result;
use crate::resolve::prompts::{self, ReviewPrompt, PATCH_VALIDATION_SYSTEM};
use crate::resolve::state::{StatePatch, WorkflowState};
use crate::resolve::types::{ReviewStatus, TaskType};
use crate::resolve::validate::{classify_problem, extract_key_points, is_valid_verdict, parse_review_status};
use async_trait::async_trait;

pub struct ReviewHandler {
    ctx: HandlerContext,
}

impl ReviewHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    fn next_task(&self, status: ReviewStatus, retries_after: u32) -> TaskType {
        match status {
            ReviewStatus::Approved => TaskType::Complete,
            ReviewStatus::Rejected if retries_after >= self.ctx.settings.review_attempt_ceiling => {
                TaskType::Failed
            }
            ReviewStatus::Rejected => TaskType::Decide,
        }
    }
}

#[async_trait]
impl StepHandler for ReviewHandler {
    fn task(&self) -> TaskType {
        TaskType::Review
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn run(&self, state: &WorkflowState) -> Result<StatePatch> {
        let settings = &self.ctx.settings;
        let budgeter = &self.ctx.budgeter;
        let problem_type = classify_problem(&state.problem_stmt);

        let system = prompts::review_system(settings.review_attempt_ceiling, problem_type);
        let problem = budgeter.truncate(&state.problem_stmt, 200, None);
        let previous = if state.review_feedback.is_empty() {
            "No previous feedback".to_string()
        } else {
            budgeter.truncate(&state.review_feedback, 200, None)
        };
        let analysis_summary = if state.analysis.is_empty() {
            String::new()
        } else {
            extract_key_points(&state.analysis)
        };

        let human = ReviewPrompt {
            problem: &problem,
            patch: &state.generated_patch,
            previous_feedback: &previous,
            analysis_summary: &analysis_summary,
            attempt: state.review_retry_count + 1,
            max_attempts: settings.review_attempt_ceiling,
        }
        .render();

        let feedback = self.ctx.oracle.invoke(&system, Some(&human)).await?;
        let mut status = parse_review_status(&feedback);

        if status == ReviewStatus::Approved {
            let verdict = self
                .ctx
                .oracle
                .invoke(
                    PATCH_VALIDATION_SYSTEM,
                    Some(&prompts::patch_validation_human(
                        &state.problem_stmt,
                        &state.generated_patch,
                    )),
                )
                .await?;
            if !is_valid_verdict(&verdict) {
                log::warn!(
                    "[{}] approval overturned by patch validation",
                    state.instance_id
                );
                status = ReviewStatus::Rejected;
            }
        }

        let delta = if status == ReviewStatus::Approved { 0 } else { 1 };
        let next = self.next_task(status, state.review_retry_count + delta);
        log::info!(
            "[{}] review {:?} (rejections: {}), next: {}",
            state.instance_id,
            status,
            state.review_retry_count + delta,
            next
        );

        Ok(StatePatch {
            review_feedback: Some(feedback.clone()),
            review_retry_count: Some(delta),
            ..StatePatch::next(next)
        }
        .with_tokens(self.ctx.tokens(&feedback)))
    }
}
