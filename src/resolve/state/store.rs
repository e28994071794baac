// SPDX-License-Identifier: MIT

//! Runtime state record and patch merging

use super::schema::{append, increment, overwrite, MergePolicy, StateField};
use crate::resolve::types::{Chunk, InstanceItem, TaskType};
use serde::{Deserialize, Serialize};

/// Fold one patch field with the reducer its [`StateField`] policy names.
///
/// A reducer that disagrees with [`StateField::policy`] fails to compile.
macro_rules! fold {
    ($field:ident, Overwrite, $slot:expr, $value:expr) => {{
        const _: () = assert!(StateField::$field.policy().is(MergePolicy::Overwrite));
        overwrite($slot, $value)
    }};
    ($field:ident, Append, $slot:expr, $value:expr) => {{
        const _: () = assert!(StateField::$field.policy().is(MergePolicy::Append));
        append($slot, $value)
    }};
    ($field:ident, Increment, $slot:expr, $value:expr) => {{
        const _: () = assert!(StateField::$field.policy().is(MergePolicy::Increment));
        increment($slot, $value)
    }};
}

/// The single record threaded through the resolution loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub current_task: TaskType,
    pub problem_stmt: String,
    pub repo_path: String,
    pub instance_id: String,
    pub retrieved_docs: Vec<Chunk>,
    pub analysis: String,
    pub analysis_history: Vec<String>,
    pub generated_patch: String,
    pub analysis_attempts: u32,
    pub review_retry_count: u32,
    pub token_count: u64,
    pub review_feedback: String,
    pub edit_history: Vec<String>,
    pub failure_reason: Option<String>,
}

/// Partial update returned by a step handler.
///
/// `None` leaves a field untouched. Counter fields carry deltas, sequence
/// fields carry the items to append.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    pub current_task: Option<TaskType>,
    pub problem_stmt: Option<String>,
    pub repo_path: Option<String>,
    pub instance_id: Option<String>,
    pub retrieved_docs: Option<Vec<Chunk>>,
    pub analysis: Option<String>,
    pub analysis_history: Option<Vec<String>>,
    pub generated_patch: Option<String>,
    pub analysis_attempts: Option<u32>,
    pub review_retry_count: Option<u32>,
    pub token_count: Option<u64>,
    pub review_feedback: Option<String>,
    pub edit_history: Option<Vec<String>>,
    pub failure_reason: Option<String>,
}

impl WorkflowState {
    /// Fresh state for an instance: counters at zero, collections empty
    pub fn new(instance: &InstanceItem, repo_path: impl Into<String>) -> Self {
        Self {
            current_task: TaskType::Decide,
            problem_stmt: instance.problem_statement.clone(),
            repo_path: repo_path.into(),
            instance_id: instance.instance_id.clone(),
            retrieved_docs: Vec::new(),
            analysis: String::new(),
            analysis_history: Vec::new(),
            generated_patch: String::new(),
            analysis_attempts: 0,
            review_retry_count: 0,
            token_count: 0,
            review_feedback: String::new(),
            edit_history: Vec::new(),
            failure_reason: None,
        }
    }

    /// Pure merge: the same `(state, patch)` always yields the same result
    pub fn merge(&self, patch: &StatePatch) -> Self {
        let mut next = self.clone();
        next.apply(patch);
        next
    }

    /// In-place merge following each field's [`MergePolicy`]
    pub fn apply(&mut self, patch: &StatePatch) {
        if let Some(v) = &patch.current_task {
            fold!(CurrentTask, Overwrite, &mut self.current_task, v);
        }
        if let Some(v) = &patch.problem_stmt {
            fold!(ProblemStmt, Overwrite, &mut self.problem_stmt, v);
        }
        if let Some(v) = &patch.repo_path {
            fold!(RepoPath, Overwrite, &mut self.repo_path, v);
        }
        if let Some(v) = &patch.instance_id {
            fold!(InstanceId, Overwrite, &mut self.instance_id, v);
        }
        if let Some(v) = &patch.retrieved_docs {
            fold!(RetrievedDocs, Append, &mut self.retrieved_docs, v);
        }
        if let Some(v) = &patch.analysis {
            fold!(Analysis, Overwrite, &mut self.analysis, v);
        }
        if let Some(v) = &patch.analysis_history {
            fold!(AnalysisHistory, Append, &mut self.analysis_history, v);
        }
        if let Some(v) = &patch.generated_patch {
            fold!(GeneratedPatch, Overwrite, &mut self.generated_patch, v);
        }
        if let Some(v) = patch.analysis_attempts {
            fold!(AnalysisAttempts, Increment, &mut self.analysis_attempts, v);
        }
        if let Some(v) = patch.review_retry_count {
            fold!(ReviewRetryCount, Increment, &mut self.review_retry_count, v);
        }
        if let Some(v) = patch.token_count {
            fold!(TokenCount, Increment, &mut self.token_count, v);
        }
        if let Some(v) = &patch.review_feedback {
            fold!(ReviewFeedback, Overwrite, &mut self.review_feedback, v);
        }
        if let Some(v) = &patch.edit_history {
            fold!(EditHistory, Append, &mut self.edit_history, v);
        }
        if let Some(v) = &patch.failure_reason {
            fold!(FailureReason, Overwrite, &mut self.failure_reason, &Some(v.clone()));
        }
    }

    /// Whether a non-empty failure reason has been recorded
    pub fn has_failure(&self) -> bool {
        self.failure_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }
}

impl StatePatch {
    /// Patch that only sets the next task
    pub fn next(task: TaskType) -> Self {
        Self {
            current_task: Some(task),
            ..Default::default()
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.token_count = Some(tokens);
        self
    }

    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    /// Fields this patch supplies a value for
    pub fn touched(&self) -> Vec<StateField> {
        let present = [
            self.current_task.is_some(),
            self.problem_stmt.is_some(),
            self.repo_path.is_some(),
            self.instance_id.is_some(),
            self.retrieved_docs.is_some(),
            self.analysis.is_some(),
            self.analysis_history.is_some(),
            self.generated_patch.is_some(),
            self.analysis_attempts.is_some(),
            self.review_retry_count.is_some(),
            self.token_count.is_some(),
            self.review_feedback.is_some(),
            self.edit_history.is_some(),
            self.failure_reason.is_some(),
        ];
        StateField::ALL
            .iter()
            .zip(present)
            .filter(|(_, p)| *p)
            .map(|(f, _)| *f)
            .collect()
    }
}
