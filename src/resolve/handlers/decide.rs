// SPDX-License-Identifier: MIT

//! Decide - refreshes retrieval and asks whether more analysis is needed

use super::{HandlerContext, StepHandler};
use crate::adk::error::Result;
use crate::resolve::prompts::DecidePrompt;
use crate::resolve::retrieval::HybridRetriever;
use crate::resolve::state::{StatePatch, WorkflowState};
use crate::resolve::types::{Chunk, TaskType};
use async_trait::async_trait;
use std::sync::Arc;

pub struct DecideHandler {
    ctx: HandlerContext,
    retriever: Arc<HybridRetriever>,
    top_k: usize,
}

impl DecideHandler {
    pub fn new(ctx: HandlerContext, retriever: Arc<HybridRetriever>, top_k: usize) -> Self {
        Self {
            ctx,
            retriever,
            top_k,
        }
    }

    fn summarize_analyses(&self, history: &[String]) -> String {
        if history.is_empty() {
            return "No previous analysis".to_string();
        }
        let start = history.len().saturating_sub(3);
        history[start..]
            .iter()
            .enumerate()
            .map(|(i, a)| {
                format!(
                    "Analysis {}: {}",
                    start + i + 1,
                    self.ctx.budgeter.truncate(a, 200, None)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn summarize_docs(&self, docs: &[Chunk]) -> String {
        if docs.is_empty() {
            return "No relevant code found".to_string();
        }
        docs.iter()
            .map(|d| format!("- {}: {}", d.source, self.ctx.budgeter.truncate(&d.content, 500, None)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl StepHandler for DecideHandler {
    fn task(&self) -> TaskType {
        TaskType::Decide
    }

    fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    async fn run(&self, state: &WorkflowState) -> Result<StatePatch> {
        let settings = &self.ctx.settings;
        let docs = self
            .retriever
            .retrieve(&state.problem_stmt, &state.review_feedback, self.top_k)
            .await;

        let problem = self.ctx.budgeter.truncate(&state.problem_stmt, 200, None);
        let feedback = self.ctx.budgeter.truncate(&state.review_feedback, 200, None);
        let analysis_summary = self.summarize_analyses(&state.analysis_history);
        let docs_summary = self.summarize_docs(&docs);

        let prompt = DecidePrompt {
            problem: &problem,
            analysis_attempts: state.analysis_attempts,
            max_attempts: settings.analysis_attempt_ceiling,
            analysis_summary: &analysis_summary,
            review_feedback: &feedback,
            docs_summary: &docs_summary,
        }
        .render();
        let prompt = self.ctx.budgeter.truncate(
            &prompt,
            settings.max_context_tokens,
            Some(settings.max_content_length),
        );
        log::debug!("Decide prompt: {} tokens", self.ctx.budgeter.count(&prompt));

        let response = self.ctx.oracle.invoke(&prompt, None).await?;
        // The verdict is advisory; the router always continues with analysis
        log::info!(
            "[{}] decide verdict: {}",
            state.instance_id,
            if response.trim().eq_ignore_ascii_case("ANALYZE") {
                "analyze"
            } else {
                "edit"
            }
        );

        Ok(StatePatch {
            retrieved_docs: Some(docs),
            ..StatePatch::next(TaskType::Analyze)
        }
        .with_tokens(self.ctx.tokens(&response)))
    }
}
