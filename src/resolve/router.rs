// SPDX-License-Identifier: MIT

//! Task router - the state machine driving one instance
//!
//! ```text
//! decide -> analyze -> { decide, edit }
//! edit   -> { review, failed }
//! review -> { complete, decide, failed }
//! ```
//!
//! The router dispatches the handler named by `current_task`, merges its
//! patch, picks the next task and checkpoints the result. Dispatches are
//! strictly sequential. A run that would exceed the step ceiling is aborted
//! with [`WorkflowError::StepCeilingExceeded`].

use crate::adk::error::{Result, WorkflowError};
use crate::resolve::checkpoint::{Checkpoint, Checkpointer, TransitionRecord};
use crate::resolve::config::WorkflowSettings;
use crate::resolve::handlers::{
    AnalyzeHandler, DecideHandler, EditHandler, HandlerContext, ReviewHandler, StepHandler,
};
use crate::resolve::retrieval::HybridRetriever;
use crate::resolve::state::{StatePatch, WorkflowState};
use crate::resolve::types::TaskType;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

const DISPATCHED_TASKS: [TaskType; 4] = [
    TaskType::Decide,
    TaskType::Analyze,
    TaskType::Edit,
    TaskType::Review,
];

/// Final state of a run plus its dispatch log
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: WorkflowState,
    pub steps: u32,
    pub transitions: Vec<TransitionRecord>,
}

pub struct Router {
    handlers: HashMap<TaskType, Arc<dyn StepHandler>>,
    settings: Arc<WorkflowSettings>,
    checkpointer: Arc<dyn Checkpointer>,
}

impl Router {
    pub fn new(settings: Arc<WorkflowSettings>, checkpointer: Arc<dyn Checkpointer>) -> Self {
        Self {
            handlers: HashMap::new(),
            settings,
            checkpointer,
        }
    }

    /// Register a handler for the task it serves, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) {
        self.handlers.insert(handler.task(), handler);
    }

    pub fn with_handler(mut self, handler: Arc<dyn StepHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Router wired with the four standard handlers sharing `ctx`
    pub fn with_default_handlers(
        ctx: HandlerContext,
        retriever: Arc<HybridRetriever>,
        top_k: usize,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        Self::new(ctx.settings.clone(), checkpointer)
            .with_handler(Arc::new(DecideHandler::new(ctx.clone(), retriever, top_k)))
            .with_handler(Arc::new(AnalyzeHandler::new(ctx.clone())))
            .with_handler(Arc::new(EditHandler::new(ctx.clone())))
            .with_handler(Arc::new(ReviewHandler::new(ctx)))
    }

    /// Maximum dispatches per run
    pub fn step_ceiling(&self) -> u32 {
        self.settings.step_ceiling()
    }

    /// Start a run from a fresh state
    pub async fn run(&self, run_id: &str, state: WorkflowState) -> Result<RunOutcome> {
        let checkpoint = Checkpoint::new(run_id, state);
        self.checkpointer.save(&checkpoint).await?;
        self.drive(checkpoint).await
    }

    /// Continue a stored run; a finished run is returned as is
    pub async fn resume(&self, run_id: &str) -> Result<RunOutcome> {
        let checkpoint = self
            .checkpointer
            .load(run_id)
            .await?
            .ok_or_else(|| WorkflowError::CheckpointMissing(run_id.to_string()))?;

        log::info!(
            "Resuming run {} at {} after {} steps",
            run_id,
            checkpoint.state.current_task,
            checkpoint.steps
        );
        self.drive(checkpoint).await
    }

    async fn drive(&self, mut checkpoint: Checkpoint) -> Result<RunOutcome> {
        for task in DISPATCHED_TASKS {
            if !self.handlers.contains_key(&task) {
                return Err(WorkflowError::MissingHandler(task.to_string()).into());
            }
        }

        let ceiling = self.step_ceiling();
        while !checkpoint.state.current_task.is_terminal() {
            if checkpoint.steps >= ceiling {
                log::error!(
                    "Run {} hit the step ceiling of {} at {}",
                    checkpoint.run_id,
                    ceiling,
                    checkpoint.state.current_task
                );
                return Err(WorkflowError::StepCeilingExceeded {
                    run_id: checkpoint.run_id.clone(),
                    limit: ceiling,
                }
                .into());
            }

            let from = checkpoint.state.current_task;
            let handler = self
                .handlers
                .get(&from)
                .ok_or_else(|| WorkflowError::MissingHandler(from.to_string()))?;

            log::info!(
                "[{}] Dispatching {} (step {}/{})",
                checkpoint.run_id,
                from,
                checkpoint.steps + 1,
                ceiling
            );
            let patch = handler.execute(&checkpoint.state).await;
            checkpoint.steps += 1;
            log::debug!(
                "[{}] {} patch touches {:?}",
                checkpoint.run_id,
                from,
                patch.touched().iter().map(|f| f.name()).collect::<Vec<_>>()
            );

            let merged = checkpoint.state.merge(&patch);
            let (to, reason) = self.next_task(from, &patch, &merged);
            checkpoint.state = merged.merge(&StatePatch {
                failure_reason: reason.clone(),
                ..StatePatch::next(to)
            });

            log::info!("[{}] {} -> {}", checkpoint.run_id, from, to);
            checkpoint.transitions.push(TransitionRecord {
                step: checkpoint.steps,
                from,
                to,
                reason,
                at: Utc::now(),
            });
            checkpoint.updated_at = Utc::now();
            self.checkpointer.save(&checkpoint).await?;
        }

        Ok(RunOutcome {
            run_id: checkpoint.run_id,
            state: checkpoint.state,
            steps: checkpoint.steps,
            transitions: checkpoint.transitions,
        })
    }

    /// Next task after `from`, with a failure reason when the run ends in `failed`.
    ///
    /// `patch` is what the handler returned and `merged` the state after it
    /// was applied.
    pub fn next_task(
        &self,
        from: TaskType,
        patch: &StatePatch,
        merged: &WorkflowState,
    ) -> (TaskType, Option<String>) {
        match from {
            TaskType::Decide => {
                if self.is_stagnant(merged) {
                    let reason = format!(
                        "Stagnation: {} analysis attempts, {} edits",
                        merged.analysis_attempts,
                        merged.edit_history.len()
                    );
                    (TaskType::Failed, Some(reason))
                } else {
                    (TaskType::Analyze, None)
                }
            }
            TaskType::Analyze => match patch.current_task {
                Some(TaskType::Edit) => (TaskType::Edit, None),
                _ => (TaskType::Decide, None),
            },
            TaskType::Edit => match patch.generated_patch.as_deref() {
                Some(p) if !p.trim().is_empty() && !crate::resolve::validate::is_invalid_marker(p) => {
                    (TaskType::Review, None)
                }
                other => {
                    let detail = match (other, patch.failure_reason.as_deref()) {
                        (Some(p), _) if !p.trim().is_empty() => p.to_string(),
                        (_, Some(reason)) => reason.to_string(),
                        _ => "no patch produced".to_string(),
                    };
                    (TaskType::Failed, Some(format!("Edit failed: {}", detail)))
                }
            },
            TaskType::Review => {
                if patch.current_task == Some(TaskType::Complete) {
                    (TaskType::Complete, None)
                } else if merged.review_retry_count >= self.settings.review_attempt_ceiling {
                    let reason = format!(
                        "Review rejected the patch {} times",
                        merged.review_retry_count
                    );
                    (TaskType::Failed, Some(reason))
                } else {
                    (TaskType::Decide, None)
                }
            }
            TaskType::Complete | TaskType::Failed => (from, None),
        }
    }

    /// Loop safety valve, evaluated after decide
    pub fn is_stagnant(&self, state: &WorkflowState) -> bool {
        state.analysis_attempts > self.settings.analysis_attempt_ceiling.saturating_mul(2)
            || state.edit_history.len() as u64
                > u64::from(self.settings.review_attempt_ceiling).saturating_mul(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::checkpoint::MemoryCheckpointer;
    use crate::resolve::handlers::HandlerContext;
    use crate::resolve::types::InstanceItem;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Handler returning a fixed patch and counting calls
    struct FixedHandler {
        task: TaskType,
        patch: StatePatch,
        calls: AtomicUsize,
        ctx: HandlerContext,
    }

    impl FixedHandler {
        fn new(task: TaskType, patch: StatePatch) -> Arc<Self> {
            Arc::new(Self {
                task,
                patch,
                calls: AtomicUsize::new(0),
                ctx: crate::resolve::handlers::testing::context(Arc::new(
                    crate::resolve::handlers::testing::ScriptedOracle::new(),
                )),
            })
        }
    }

    #[async_trait]
    impl StepHandler for FixedHandler {
        fn task(&self) -> TaskType {
            self.task
        }

        fn context(&self) -> &HandlerContext {
            &self.ctx
        }

        async fn run(&self, _state: &WorkflowState) -> Result<StatePatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.patch.clone())
        }
    }

    fn state() -> WorkflowState {
        let instance = InstanceItem {
            instance_id: "demo-1".to_string(),
            repo: "acme/parser".to_string(),
            base_commit: "abc".to_string(),
            problem_statement: "fix off-by-one in parser".to_string(),
        };
        WorkflowState::new(&instance, "repo")
    }

    fn router() -> Router {
        Router::new(
            Arc::new(WorkflowSettings::default()),
            Arc::new(MemoryCheckpointer::new()),
        )
    }

    #[test]
    fn test_stagnation_thresholds() {
        let r = router();
        let mut s = state();
        s.analysis_attempts = 6;
        assert!(!r.is_stagnant(&s));
        s.analysis_attempts = 7;
        assert!(r.is_stagnant(&s));

        let mut s = state();
        s.edit_history = vec![String::new(); 9];
        assert!(!r.is_stagnant(&s));
        s.edit_history.push(String::new());
        assert!(r.is_stagnant(&s));
    }

    #[test]
    fn test_decide_routes_to_failed_on_stagnation() {
        let r = router();
        let mut s = state();
        s.analysis_attempts = 2 * 3 + 1;
        let (next, reason) = r.next_task(TaskType::Decide, &StatePatch::default(), &s);
        assert_eq!(next, TaskType::Failed);
        assert!(reason.unwrap().starts_with("Stagnation"));

        let (next, _) = r.next_task(TaskType::Decide, &StatePatch::default(), &state());
        assert_eq!(next, TaskType::Analyze);
    }

    #[test]
    fn test_edit_transitions() {
        let r = router();
        let s = state();
        let good = StatePatch {
            generated_patch: Some("diff --git a/x b/x".to_string()),
            ..Default::default()
        };
        assert_eq!(r.next_task(TaskType::Edit, &good, &s).0, TaskType::Review);

        let invalid = StatePatch {
            generated_patch: Some("INVALID: Malformed diff structure".to_string()),
            ..Default::default()
        };
        let (next, reason) = r.next_task(TaskType::Edit, &invalid, &s);
        assert_eq!(next, TaskType::Failed);
        assert!(reason.unwrap().contains("Malformed"));

        let (next, reason) = r.next_task(TaskType::Edit, &StatePatch::default(), &s);
        assert_eq!(next, TaskType::Failed);
        assert_eq!(reason.as_deref(), Some("Edit failed: no patch produced"));
    }

    #[test]
    fn test_review_transitions() {
        let r = router();
        let mut s = state();
        let approved = StatePatch::next(TaskType::Complete);
        assert_eq!(r.next_task(TaskType::Review, &approved, &s).0, TaskType::Complete);

        let rejected = StatePatch::next(TaskType::Decide);
        s.review_retry_count = 1;
        assert_eq!(r.next_task(TaskType::Review, &rejected, &s).0, TaskType::Decide);
        s.review_retry_count = 3;
        assert_eq!(r.next_task(TaskType::Review, &rejected, &s).0, TaskType::Failed);
    }

    #[tokio::test]
    async fn test_missing_handler_aborts_before_dispatch() {
        let decide = FixedHandler::new(TaskType::Decide, StatePatch::next(TaskType::Analyze));
        let r = router().with_handler(decide.clone());

        let err = r.run("demo-1", state()).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(decide.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_step_ceiling_aborts() {
        // analyze always asks for more decisions: a decide/analyze cycle
        let decide = FixedHandler::new(TaskType::Decide, StatePatch::next(TaskType::Analyze));
        let analyze = FixedHandler::new(TaskType::Analyze, StatePatch::next(TaskType::Decide));
        let edit = FixedHandler::new(TaskType::Edit, StatePatch::default());
        let review = FixedHandler::new(TaskType::Review, StatePatch::default());

        let settings = WorkflowSettings {
            step_ceiling_margin: 4,
            ..Default::default()
        };
        let r = Router::new(Arc::new(settings), Arc::new(MemoryCheckpointer::new()))
            .with_handler(decide.clone())
            .with_handler(analyze.clone())
            .with_handler(edit)
            .with_handler(review);

        let err = r.run("demo-1", state()).await.unwrap_err();
        assert!(matches!(
            err,
            crate::adk::error::ResolveError::Workflow(WorkflowError::StepCeilingExceeded { limit: 10, .. })
        ));
        let dispatched =
            decide.calls.load(Ordering::SeqCst) + analyze.calls.load(Ordering::SeqCst);
        assert_eq!(dispatched, 10);
    }

    #[tokio::test]
    async fn test_resume_missing_run() {
        let err = router().resume("nope").await.unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
