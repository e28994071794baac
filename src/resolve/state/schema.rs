// SPDX-License-Identifier: MIT

//! Merge policies for workflow state fields

/// How a patch value is folded into the current value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Replace the value
    Overwrite,
    /// Concatenate onto a sequence
    Append,
    /// Add a delta to a counter
    Increment,
}

impl MergePolicy {
    /// `==` usable in const context
    pub const fn is(self, other: MergePolicy) -> bool {
        self as u8 == other as u8
    }
}

/// Every field of [`super::WorkflowState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    CurrentTask,
    ProblemStmt,
    RepoPath,
    InstanceId,
    RetrievedDocs,
    Analysis,
    AnalysisHistory,
    GeneratedPatch,
    AnalysisAttempts,
    ReviewRetryCount,
    TokenCount,
    ReviewFeedback,
    EditHistory,
    FailureReason,
}

impl StateField {
    pub const ALL: [StateField; 14] = [
        StateField::CurrentTask,
        StateField::ProblemStmt,
        StateField::RepoPath,
        StateField::InstanceId,
        StateField::RetrievedDocs,
        StateField::Analysis,
        StateField::AnalysisHistory,
        StateField::GeneratedPatch,
        StateField::AnalysisAttempts,
        StateField::ReviewRetryCount,
        StateField::TokenCount,
        StateField::ReviewFeedback,
        StateField::EditHistory,
        StateField::FailureReason,
    ];

    /// The fixed merge policy of this field
    pub const fn policy(self) -> MergePolicy {
        match self {
            StateField::RetrievedDocs | StateField::AnalysisHistory | StateField::EditHistory => {
                MergePolicy::Append
            }
            StateField::AnalysisAttempts | StateField::ReviewRetryCount | StateField::TokenCount => {
                MergePolicy::Increment
            }
            StateField::CurrentTask
            | StateField::ProblemStmt
            | StateField::RepoPath
            | StateField::InstanceId
            | StateField::Analysis
            | StateField::GeneratedPatch
            | StateField::ReviewFeedback
            | StateField::FailureReason => MergePolicy::Overwrite,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            StateField::CurrentTask => "current_task",
            StateField::ProblemStmt => "problem_stmt",
            StateField::RepoPath => "repo_path",
            StateField::InstanceId => "instance_id",
            StateField::RetrievedDocs => "retrieved_docs",
            StateField::Analysis => "analysis",
            StateField::AnalysisHistory => "analysis_history",
            StateField::GeneratedPatch => "generated_patch",
            StateField::AnalysisAttempts => "analysis_attempts",
            StateField::ReviewRetryCount => "review_retry_count",
            StateField::TokenCount => "token_count",
            StateField::ReviewFeedback => "review_feedback",
            StateField::EditHistory => "edit_history",
            StateField::FailureReason => "failure_reason",
        }
    }
}

/// Overwrite reducer
pub(super) fn overwrite<T>(slot: &mut T, value: &T)
where
    T: Clone,
{
    *slot = value.clone();
}

/// Append reducer
pub(super) fn append<T: Clone>(slot: &mut Vec<T>, items: &[T]) {
    slot.extend_from_slice(items);
}

/// Increment reducer; saturates instead of wrapping
pub(super) fn increment<T>(slot: &mut T, delta: T)
where
    T: Copy + SaturatingAdd,
{
    *slot = slot.saturating_add_to(delta);
}

/// Counter types the increment reducer accepts
pub(super) trait SaturatingAdd {
    fn saturating_add_to(self, delta: Self) -> Self;
}

impl SaturatingAdd for u32 {
    fn saturating_add_to(self, delta: Self) -> Self {
        self.saturating_add(delta)
    }
}

impl SaturatingAdd for u64 {
    fn saturating_add_to(self, delta: Self) -> Self {
        self.saturating_add(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_field_has_one_policy() {
        let names: HashSet<&str> = StateField::ALL.iter().map(|f| f.name()).collect();
        assert_eq!(names.len(), StateField::ALL.len());
    }

    #[test]
    fn test_counter_policies() {
        assert_eq!(StateField::TokenCount.policy(), MergePolicy::Increment);
        assert_eq!(StateField::AnalysisAttempts.policy(), MergePolicy::Increment);
        assert_eq!(StateField::ReviewRetryCount.policy(), MergePolicy::Increment);
    }

    #[test]
    fn test_sequence_policies() {
        assert_eq!(StateField::RetrievedDocs.policy(), MergePolicy::Append);
        assert_eq!(StateField::AnalysisHistory.policy(), MergePolicy::Append);
        assert_eq!(StateField::EditHistory.policy(), MergePolicy::Append);
        assert_eq!(StateField::GeneratedPatch.policy(), MergePolicy::Overwrite);
    }

    #[test]
    fn test_const_policy_comparison() {
        for field in StateField::ALL {
            for policy in [MergePolicy::Overwrite, MergePolicy::Append, MergePolicy::Increment] {
                assert_eq!(field.policy().is(policy), field.policy() == policy);
            }
        }
    }

    #[test]
    fn test_reducers() {
        let mut s = "old".to_string();
        overwrite(&mut s, &"new".to_string());
        assert_eq!(s, "new");

        let mut v = vec![1, 2];
        append(&mut v, &[3]);
        assert_eq!(v, vec![1, 2, 3]);

        let mut n = u32::MAX - 1;
        increment(&mut n, 5);
        assert_eq!(n, u32::MAX);
    }
}
