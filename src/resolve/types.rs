// SPDX-License-Identifier: MIT

//! Core domain types shared by the router, handlers and retriever

use serde::{Deserialize, Serialize};
use std::fmt;

/// Step the router dispatches next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Decide,
    Analyze,
    Edit,
    Review,
    Complete,
    Failed,
}

impl TaskType {
    /// Terminal tasks have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskType::Complete | TaskType::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Decide => "decide",
            TaskType::Analyze => "analyze",
            TaskType::Edit => "edit",
            TaskType::Review => "review",
            TaskType::Complete => "complete",
            TaskType::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict parsed from a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Approved,
    Rejected,
}

/// Immutable problem bundle seeding one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceItem {
    pub instance_id: String,
    /// Repository coordinates, `owner/name`
    pub repo: String,
    pub base_commit: String,
    pub problem_statement: String,
}

impl InstanceItem {
    /// Directory name of the checked-out repository
    pub fn repo_name(&self) -> String {
        self.repo.replace('/', "__")
    }
}

/// A retrieved code fragment.
///
/// Identity is `(source, content_hash)`; `score` is whatever the producing
/// ranker assigned and takes no part in equality of identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Path relative to the repository root
    pub source: String,
    pub file_type: String,
    pub content: String,
    pub content_hash: String,
    #[serde(default)]
    pub score: f32,
}

/// Identity of a chunk
pub type ChunkKey = (String, String);

impl Chunk {
    pub fn new(source: impl Into<String>, file_type: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();
        Self {
            source: source.into(),
            file_type: file_type.into(),
            content,
            content_hash,
            score: 0.0,
        }
    }

    pub fn key(&self) -> ChunkKey {
        (self.source.clone(), self.content_hash.clone())
    }

    /// Same chunk with a different score
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

/// Outcome reported for a finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What the result sink receives for one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub instance_id: String,
    pub patch: String,
    pub status: RunStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_tasks() {
        assert!(TaskType::Complete.is_terminal());
        assert!(TaskType::Failed.is_terminal());
        assert!(!TaskType::Decide.is_terminal());
        assert!(!TaskType::Review.is_terminal());
    }

    #[test]
    fn test_task_serde_is_lowercase() {
        assert_eq!(serde_json::to_string(&TaskType::Analyze).unwrap(), "\"analyze\"");
        let t: TaskType = serde_json::from_str("\"review\"").unwrap();
        assert_eq!(t, TaskType::Review);
    }

    #[test]
    fn test_repo_name() {
        let item = InstanceItem {
            instance_id: "astropy__astropy-12907".to_string(),
            repo: "astropy/astropy".to_string(),
            base_commit: "d16bfe05".to_string(),
            problem_statement: "separability matrix".to_string(),
        };
        assert_eq!(item.repo_name(), "astropy__astropy");
    }

    #[test]
    fn test_chunk_identity_ignores_score() {
        let a = Chunk::new("src/parser.py", "py", "def parse(): pass");
        let b = a.clone().with_score(4.0);
        assert_eq!(a.key(), b.key());
        assert_ne!(a, b);

        let other = Chunk::new("src/lexer.py", "py", "def parse(): pass");
        assert_eq!(a.content_hash, other.content_hash);
        assert_ne!(a.key(), other.key());
    }
}
