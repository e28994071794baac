// SPDX-License-Identifier: MIT

//! Integration tests for the resolution loop
//!
//! These tests drive the router end to end with a scripted oracle and the
//! offline hashing embedder.

use async_trait::async_trait;
use resolve_rs::adk::embedding::HashingEmbedder;
use resolve_rs::adk::error::{ResolveError, Result, WorkflowError};
use resolve_rs::adk::oracle::Oracle;
use resolve_rs::adk::tokens::TokenBudgeter;
use resolve_rs::resolve::checkpoint::{Checkpointer, FileCheckpointer, MemoryCheckpointer};
use resolve_rs::resolve::config::{Settings, WorkflowSettings};
use resolve_rs::resolve::handlers::HandlerContext;
use resolve_rs::resolve::prompts::{
    ANALYSIS_HEADER, ANALYSIS_VALIDATION_SYSTEM, DECIDE_HEADER, EDIT_HEADER,
    PATCH_VALIDATION_SYSTEM, REVIEW_HEADER, TERM_EXTRACTION_SYSTEM,
};
use resolve_rs::resolve::retrieval::{CorpusIndex, FsCorpus, HybridRetriever};
use resolve_rs::resolve::sink::{run_result, PredictionStore};
use resolve_rs::resolve::state::WorkflowState;
use resolve_rs::resolve::{InstanceItem, Router, RunStatus, TaskType, WorkflowRunner};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock Components
// ============================================================================

const PATCH: &str = "diff --git a/pkg/parser.py b/pkg/parser.py\n\
--- a/pkg/parser.py\n\
+++ b/pkg/parser.py\n\
@@ -1,2 +1,2 @@\n\
 def parse(tokens):\n\
-    return tokens[1:]\n\
+    return tokens[0:]\n";

const ANALYSIS: &str = "Critical Issue: parse drops the first token\n\
Proposed Solution: slice from index 0\n\
Implementation Step: change tokens[1:] to tokens[0:]";

/// Oracle answering by system-prompt header; the last reply for a header repeats
struct MockOracle {
    replies: Vec<(&'static str, Vec<String>)>,
    served: Mutex<HashMap<&'static str, usize>>,
    calls: AtomicUsize,
    fail: bool,
}

impl MockOracle {
    fn new() -> Self {
        Self {
            replies: Vec::new(),
            served: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// Every call fails
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Script replies for a header, replacing any earlier script for it
    fn on(mut self, header: &'static str, replies: &[&str]) -> Self {
        let replies: Vec<String> = replies.iter().map(|r| r.to_string()).collect();
        match self.replies.iter_mut().find(|(h, _)| *h == header) {
            Some(entry) => entry.1 = replies,
            None => self.replies.push((header, replies)),
        }
        self
    }

    /// Oracle that approves the first patch it sees
    fn cooperative() -> Self {
        Self::new()
            .on(TERM_EXTRACTION_SYSTEM, &["parse, tokens, off-by-one"])
            .on(DECIDE_HEADER, &["ANALYZE"])
            .on(ANALYSIS_HEADER, &[ANALYSIS])
            .on(ANALYSIS_VALIDATION_SYSTEM, &["VALID"])
            .on(EDIT_HEADER, &[PATCH])
            .on(PATCH_VALIDATION_SYSTEM, &["VALID"])
            .on(REVIEW_HEADER, &["Looks right.\nSTATUS: APPROVED"])
    }

    fn served(&self, header: &'static str) -> usize {
        self.served.lock().unwrap().get(header).copied().unwrap_or(0)
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn invoke(&self, system: &str, _human: Option<&str>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ResolveError::api("mock", "service unavailable"));
        }

        let (header, replies) = self
            .replies
            .iter()
            .find(|(header, _)| system.starts_with(header))
            .ok_or_else(|| ResolveError::other(format!("unscripted prompt: {}", system)))?;

        let mut served = self.served.lock().unwrap();
        let n = served.entry(*header).or_insert(0);
        let reply = replies[(*n).min(replies.len() - 1)].clone();
        *n += 1;
        Ok(reply)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn instance() -> InstanceItem {
    InstanceItem {
        instance_id: "acme__parser-101".to_string(),
        repo: "acme/parser".to_string(),
        base_commit: "4f2a9c1".to_string(),
        problem_statement: "fix off-by-one in parser".to_string(),
    }
}

/// 20 chunks over 3 files: parser 10, lexer 6, utils 4
async fn corpus_index() -> Arc<CorpusIndex> {
    let mut chunks = Vec::new();
    for i in 0..10 {
        chunks.push(resolve_rs::resolve::types::Chunk::new(
            "pkg/parser.py",
            ".py",
            format!("def parse_{i}(tokens):\n    # parser off-by-one\n    return tokens[{i}:]\n"),
        ));
    }
    for i in 0..6 {
        chunks.push(resolve_rs::resolve::types::Chunk::new(
            "pkg/lexer.py",
            ".py",
            format!("def lex_{i}(text):\n    return text.split()[{i}]\n"),
        ));
    }
    for i in 0..4 {
        chunks.push(resolve_rs::resolve::types::Chunk::new(
            "pkg/utils.py",
            ".py",
            format!("def helper_{i}(value):\n    return value + {i}\n"),
        ));
    }
    let index = CorpusIndex::from_chunks(chunks, Arc::new(HashingEmbedder::new(128)))
        .await
        .unwrap();
    Arc::new(index)
}

async fn router_with(
    oracle: Arc<MockOracle>,
    settings: WorkflowSettings,
    checkpointer: Arc<dyn Checkpointer>,
) -> Router {
    let oracle: Arc<dyn Oracle> = oracle;
    let ctx = HandlerContext::new(
        oracle.clone(),
        Arc::new(TokenBudgeter::cl100k().unwrap()),
        Arc::new(settings),
    );
    let retriever = Arc::new(HybridRetriever::new(corpus_index().await, oracle, 20));
    Router::with_default_handlers(ctx, retriever, 5, checkpointer)
}

async fn router(oracle: Arc<MockOracle>) -> Router {
    router_with(
        oracle,
        WorkflowSettings::default(),
        Arc::new(MemoryCheckpointer::new()),
    )
    .await
}

fn fresh_state() -> WorkflowState {
    WorkflowState::new(&instance(), "repos/acme__parser")
}

// ============================================================================
// Retrieval
// ============================================================================

#[tokio::test]
async fn test_retrieval_covers_every_file_before_repeating() {
    let oracle: Arc<dyn Oracle> = Arc::new(MockOracle::cooperative());
    let retriever = HybridRetriever::new(corpus_index().await, oracle, 20);

    let chunks = retriever.retrieve("fix off-by-one in parser", "", 5).await;
    assert_eq!(chunks.len(), 5);

    let first_three: HashSet<&str> = chunks[..3].iter().map(|c| c.source.as_str()).collect();
    assert_eq!(first_three.len(), 3);

    let keys: HashSet<_> = chunks.iter().map(|c| c.key()).collect();
    assert_eq!(keys.len(), chunks.len());
}

#[tokio::test]
async fn test_retrieval_survives_oracle_failure() {
    let oracle: Arc<dyn Oracle> = Arc::new(MockOracle::failing());
    let retriever = HybridRetriever::new(corpus_index().await, oracle, 20);

    let chunks = retriever.retrieve("fix off-by-one in parser", "", 5).await;
    assert_eq!(chunks.len(), 5);
}

// ============================================================================
// Router end to end
// ============================================================================

#[tokio::test]
async fn test_first_review_approval_completes() {
    let oracle = Arc::new(MockOracle::cooperative());
    let r = router(oracle.clone()).await;

    let outcome = r.run("run-approve", fresh_state()).await.unwrap();
    let state = &outcome.state;
    assert_eq!(state.current_task, TaskType::Complete);
    assert_eq!(state.review_retry_count, 0);
    assert_eq!(state.analysis_attempts, 3);
    assert_eq!(state.generated_patch, PATCH);
    assert!(!state.has_failure());

    // decide/analyze three times, then edit and review
    assert_eq!(outcome.steps, 8);
    let path: Vec<TaskType> = outcome.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        path,
        vec![
            TaskType::Analyze,
            TaskType::Decide,
            TaskType::Analyze,
            TaskType::Decide,
            TaskType::Analyze,
            TaskType::Edit,
            TaskType::Review,
            TaskType::Complete,
        ]
    );

    let result = run_result(state);
    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.patch, PATCH);
    assert!(state.token_count > 0);
}

#[tokio::test]
async fn test_invalid_patch_fails_with_reason() {
    let oracle = Arc::new(
        MockOracle::cooperative().on(EDIT_HEADER, &["Change line 2 to start at zero."]),
    );
    let r = router(oracle.clone()).await;

    let outcome = r.run("run-invalid", fresh_state()).await.unwrap();
    let state = &outcome.state;
    assert_eq!(state.current_task, TaskType::Failed);
    assert!(state.has_failure());
    assert!(state.failure_reason.as_deref().unwrap().contains("Malformed"));

    let edits = outcome
        .transitions
        .iter()
        .filter(|t| t.from == TaskType::Edit)
        .count();
    assert!(edits <= WorkflowSettings::default().review_attempt_ceiling as usize + 1);
    assert_eq!(oracle.served(REVIEW_HEADER), 0);

    let result = run_result(state);
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.patch, "");
}

#[tokio::test]
async fn test_repeated_rejection_fails_after_ceiling() {
    let oracle = Arc::new(
        MockOracle::cooperative().on(REVIEW_HEADER, &["Empty input still crashes.\nSTATUS: REJECTED"]),
    );
    let r = router(oracle.clone()).await;

    let outcome = r.run("run-reject", fresh_state()).await.unwrap();
    let state = &outcome.state;
    assert_eq!(state.current_task, TaskType::Failed);
    assert_eq!(state.review_retry_count, 3);
    assert_eq!(state.edit_history.len(), 3);
    assert_eq!(oracle.served(REVIEW_HEADER), 3);
    assert!(state
        .failure_reason
        .as_deref()
        .unwrap()
        .starts_with("Review rejected"));
    assert!(outcome.steps <= r.step_ceiling());
}

#[tokio::test]
async fn test_stagnant_run_fails_at_decide() {
    let oracle = Arc::new(MockOracle::cooperative());
    let r = router(oracle.clone()).await;

    let mut state = fresh_state();
    state.analysis_attempts = 2 * WorkflowSettings::default().analysis_attempt_ceiling + 1;

    let outcome = r.run("run-stagnant", state).await.unwrap();
    assert_eq!(outcome.steps, 1);
    assert_eq!(outcome.state.current_task, TaskType::Failed);
    assert!(outcome
        .state
        .failure_reason
        .as_deref()
        .unwrap()
        .starts_with("Stagnation"));
}

#[tokio::test]
async fn test_step_ceiling_aborts_run() {
    let oracle = Arc::new(MockOracle::cooperative());
    let settings = WorkflowSettings {
        step_ceiling_margin: 0,
        ..Default::default()
    };
    let checkpointer = Arc::new(MemoryCheckpointer::new());
    let r = router_with(oracle, settings, checkpointer.clone()).await;
    assert_eq!(r.step_ceiling(), 6);

    let err = r.run("run-ceiling", fresh_state()).await.unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Workflow(WorkflowError::StepCeilingExceeded { limit: 6, .. })
    ));
    assert!(err.is_fatal());

    let stored = checkpointer.load("run-ceiling").await.unwrap().unwrap();
    assert_eq!(stored.steps, 6);
    assert!(!stored.is_terminal());
}

#[tokio::test]
async fn test_failing_oracle_is_aborted_not_hung() {
    let oracle = Arc::new(MockOracle::failing());
    let r = router(oracle.clone()).await;

    let err = r.run("run-down", fresh_state()).await.unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Workflow(WorkflowError::StepCeilingExceeded { .. })
    ));
    assert!(oracle.call_count() > 0);
}

#[tokio::test]
async fn test_resume_from_file_checkpoint() {
    let dir = tempfile::TempDir::new().unwrap();
    let checkpointer = Arc::new(FileCheckpointer::new(dir.path()));

    // First process: stopped by a tight ceiling after six steps
    let tight = WorkflowSettings {
        step_ceiling_margin: 0,
        ..Default::default()
    };
    let first = router_with(Arc::new(MockOracle::cooperative()), tight, checkpointer.clone()).await;
    assert!(first.run("run-resume", fresh_state()).await.is_err());

    // Second process: picks up at the stored task
    let oracle = Arc::new(MockOracle::cooperative());
    let second = router_with(
        oracle.clone(),
        WorkflowSettings::default(),
        checkpointer.clone(),
    )
    .await;
    let outcome = second.resume("run-resume").await.unwrap();

    assert_eq!(outcome.state.current_task, TaskType::Complete);
    assert_eq!(outcome.steps, 8);
    assert_eq!(outcome.transitions.len(), 8);
    // Only edit and review were left to run
    assert_eq!(oracle.served(ANALYSIS_HEADER), 0);
    assert_eq!(oracle.served(EDIT_HEADER), 1);

    // A finished run is returned without dispatching
    let again = second.resume("run-resume").await.unwrap();
    assert_eq!(again.steps, 8);
    assert_eq!(oracle.served(REVIEW_HEADER), 1);
}

// ============================================================================
// Runner
// ============================================================================

#[tokio::test]
async fn test_runner_writes_predictions() {
    let dir = tempfile::TempDir::new().unwrap();
    let repo = dir.path().join("repos").join("acme__parser");
    std::fs::create_dir_all(repo.join("pkg")).unwrap();
    std::fs::create_dir_all(repo.join("tests")).unwrap();
    std::fs::write(
        repo.join("pkg").join("parser.py"),
        "def parse(tokens):\n    return tokens[1:]\n",
    )
    .unwrap();
    std::fs::write(
        repo.join("tests").join("test_parser.py"),
        "def test_parse():\n    assert parse([1]) == [1]\n",
    )
    .unwrap();

    let settings = Settings {
        repo_clone_path: dir.path().join("repos"),
        ..Default::default()
    };
    let runner = WorkflowRunner::new(
        Arc::new(settings.clone()),
        Arc::new(MockOracle::cooperative()),
        Arc::new(TokenBudgeter::cl100k().unwrap()),
        Arc::new(HashingEmbedder::new(64)),
        Arc::new(FsCorpus::from_settings(&settings.retrieval)),
        Arc::new(MemoryCheckpointer::new()),
    );

    let index = runner.index_for(&repo).await.unwrap();
    assert!(index.chunks().iter().all(|c| !c.source.starts_with("tests/")));

    let predictions_path = dir.path().join("results").join("predictions.json");
    let store = PredictionStore::load(&predictions_path, "gpt-4-turbo")
        .await
        .unwrap();

    let mut missing = instance();
    missing.instance_id = "other__repo-1".to_string();
    missing.repo = "other/repo".to_string();

    let summary = runner
        .run_all(vec![instance(), missing], &store)
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.aborted.len(), 1);
    assert_eq!(summary.aborted[0].0, "other__repo-1");

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&predictions_path).unwrap()).unwrap();
    assert_eq!(saved[0]["instance_id"], "acme__parser-101");
    assert_eq!(saved[0]["model_name_or_path"], "gpt-4-turbo");
    assert_eq!(saved[0]["model_patch"], PATCH);
    assert_eq!(saved[0]["status"], "success");

    // A second pass skips what is already predicted
    let summary = runner.run_all(vec![instance()], &store).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.completed, 0);
}
