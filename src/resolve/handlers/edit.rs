// SPDX-License-Identifier: MIT

//! Edit - generates a unified diff and validates it

use super::{HandlerContext, StepHandler};
use crate::adk::error::Result;
use crate::resolve::prompts::{self, EditPrompt, PATCH_VALIDATION_SYSTEM};
use crate::resolve::state::{StatePatch, WorkflowState};
use crate::resolve::types::TaskType;
use crate::resolve::validate::{
    classify_problem, extract_diff, extract_key_points, files_touched, has_diff_structure,
    invalid_marker, is_invalid_marker, is_valid_verdict,
};
use async_trait::async_trait;

pub struct EditHandler {
    ctx: HandlerContext,
}

impl EditHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    /// Problem statement plus as many retrieved chunks as the remaining
    /// token budget allows
    fn assemble_context(&self, state: &WorkflowState) -> String {
        let settings = &self.ctx.settings;
        let budgeter = &self.ctx.budgeter;
        let budget = (settings.max_context_tokens as u64).saturating_sub(state.token_count) as usize;

        let problem = budgeter.truncate(
            &state.problem_stmt,
            budget / 4,
            Some(settings.max_content_length / 10),
        );
        let mut parts = vec![format!("## Problem Statement\n{}", problem)];
        let mut remaining = budget.saturating_sub(budgeter.count(&problem));

        let mut code = Vec::new();
        for doc in &state.retrieved_docs {
            let block = format!("### {}\n{}", doc.source, doc.content);
            let needed = budgeter.count(&block);
            if needed <= remaining {
                remaining -= needed;
                code.push(block);
            } else {
                if remaining > 0 {
                    code.push(budgeter.truncate(&block, remaining, None));
                }
                break;
            }
        }
        if !code.is_empty() {
            parts.push(format!("## Relevant Code Context\n{}", code.join("\n")));
        }

        parts.join("\n\n")
    }

    /// The patch itself, or an `INVALID:` marker naming the failed check
    async fn validate(&self, patch: &str, problem: &str) -> Result<String> {
        if !has_diff_structure(patch) {
            return Ok(invalid_marker("Malformed diff structure"));
        }

        let touched = files_touched(patch);
        if touched > self.ctx.settings.max_files_per_patch {
            return Ok(invalid_marker(&format!(
                "Touches {} files, limit is {}",
                touched, self.ctx.settings.max_files_per_patch
            )));
        }

        let verdict = self
            .ctx
            .oracle
            .invoke(
                PATCH_VALIDATION_SYSTEM,
                Some(&prompts::patch_validation_human(problem, patch)),
            )
            .await?;
        if !is_valid_verdict(&verdict) {
            return Ok(invalid_marker("Does not address problem"));
        }

        Ok(patch.to_string())
    }
}

#[async_trait]
impl StepHandler for EditHandler {
    fn task(&self) -> TaskType {
        TaskType::Edit
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn run(&self, state: &WorkflowState) -> Result<StatePatch> {
        let settings = &self.ctx.settings;
        let budgeter = &self.ctx.budgeter;

        let context = self.assemble_context(state);
        let system = prompts::edit_system(
            classify_problem(&state.problem_stmt),
            settings.max_files_per_patch,
        );

        let problem = budgeter.truncate(
            &state.problem_stmt,
            200,
            Some(settings.max_content_length / 10),
        );
        let analysis_summary = if state.analysis.is_empty() {
            String::new()
        } else {
            extract_key_points(&state.analysis)
        };
        let code_context = budgeter.truncate(&context, 3000, Some(settings.max_content_length / 2));
        let previous = self.ctx.format_attempts(&state.edit_history, "No previous attempts");
        let feedback = budgeter.truncate(&state.review_feedback, 200, Some(500));

        let human = EditPrompt {
            problem: &problem,
            analysis_summary: &analysis_summary,
            code_context: &code_context,
            previous_attempts: &previous,
            review_feedback: &feedback,
        }
        .render();

        let raw = self.ctx.oracle.invoke(&system, Some(&human)).await?;
        let patch = self.validate(&extract_diff(&raw), &state.problem_stmt).await?;

        let next = if is_invalid_marker(&patch) {
            log::warn!("[{}] edit rejected: {}", state.instance_id, patch);
            TaskType::Failed
        } else {
            log::info!(
                "[{}] edit produced a patch touching {} files",
                state.instance_id,
                files_touched(&patch)
            );
            TaskType::Review
        };

        Ok(StatePatch {
            generated_patch: Some(patch.clone()),
            edit_history: Some(vec![patch]),
            ..StatePatch::next(next)
        }
        .with_tokens(self.ctx.tokens(&raw)))
    }
}
