// SPDX-License-Identifier: MIT

//! Batch runner: one router run per instance on a bounded worker pool

use crate::adk::embedding::Embedder;
use crate::adk::error::{ResolveError, Result};
use crate::adk::oracle::Oracle;
use crate::adk::tokens::TokenBudgeter;
use crate::resolve::checkpoint::Checkpointer;
use crate::resolve::config::Settings;
use crate::resolve::handlers::HandlerContext;
use crate::resolve::retrieval::{CorpusIndex, CorpusProvider, HybridRetriever};
use crate::resolve::router::Router;
use crate::resolve::sink::{run_result, PredictionStore, ResultSink};
use crate::resolve::state::WorkflowState;
use crate::resolve::types::{InstanceItem, RunResult};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// Counts reported after a batch
#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    /// Instances aborted by a fatal error, with the error text
    pub aborted: Vec<(String, String)>,
}

pub struct WorkflowRunner {
    settings: Arc<Settings>,
    oracle: Arc<dyn Oracle>,
    budgeter: Arc<TokenBudgeter>,
    embedder: Arc<dyn Embedder>,
    corpus: Arc<dyn CorpusProvider>,
    checkpointer: Arc<dyn Checkpointer>,
    /// One cell per repository; the map lock is never held across a build
    indexes: Mutex<HashMap<PathBuf, Arc<OnceCell<Arc<CorpusIndex>>>>>,
}

impl WorkflowRunner {
    pub fn new(
        settings: Arc<Settings>,
        oracle: Arc<dyn Oracle>,
        budgeter: Arc<TokenBudgeter>,
        embedder: Arc<dyn Embedder>,
        corpus: Arc<dyn CorpusProvider>,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        Self {
            settings,
            oracle,
            budgeter,
            embedder,
            corpus,
            checkpointer,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    /// Shared index for a repository, built on first use.
    ///
    /// Concurrent callers for the same repository wait on a single build;
    /// lookups for other repositories do not. A failed build leaves the cell
    /// empty so the next caller retries.
    pub async fn index_for(&self, repo_path: &Path) -> Result<Arc<CorpusIndex>> {
        let cell = {
            let mut indexes = self.indexes.lock().await;
            indexes
                .entry(repo_path.to_path_buf())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let index = cell
            .get_or_try_init(|| async {
                log::info!("Indexing {}", repo_path.display());
                CorpusIndex::build(repo_path, self.corpus.clone(), self.embedder.clone())
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(index.clone())
    }

    fn router(&self, index: Arc<CorpusIndex>) -> Router {
        let ctx = HandlerContext::new(
            self.oracle.clone(),
            self.budgeter.clone(),
            Arc::new(self.settings.workflow.clone()),
        );
        let retriever = Arc::new(HybridRetriever::new(
            index,
            self.oracle.clone(),
            self.settings.retrieval.lexical_candidates,
        ));
        Router::with_default_handlers(
            ctx,
            retriever,
            self.settings.retrieval.top_k,
            self.checkpointer.clone(),
        )
    }

    /// Run one instance to a terminal task.
    ///
    /// A stored non-terminal checkpoint is resumed; a finished one is reported
    /// without dispatching anything.
    pub async fn solve(&self, instance: &InstanceItem) -> Result<RunResult> {
        let run_id = instance.instance_id.as_str();
        let stored = self.checkpointer.load(run_id).await?;
        if let Some(checkpoint) = &stored {
            if checkpoint.is_terminal() {
                log::info!("[{}] already finished at {}", run_id, checkpoint.state.current_task);
                return Ok(run_result(&checkpoint.state));
            }
        }

        let repo_path = self.settings.repo_clone_path.join(instance.repo_name());
        let index = self.index_for(&repo_path).await?;
        let router = self.router(index);

        let outcome = match stored {
            Some(_) => router.resume(run_id).await?,
            None => {
                let state = WorkflowState::new(instance, repo_path.display().to_string());
                router.run(run_id, state).await?
            }
        };

        let result = run_result(&outcome.state);
        log::info!(
            "[{}] finished as {} after {} steps ({} tokens)",
            run_id,
            result.status,
            outcome.steps,
            outcome.state.token_count
        );
        Ok(result)
    }

    /// Solve every instance not yet in `store`, at most `max_workers` at a time,
    /// then save the store
    pub async fn run_all(
        &self,
        instances: Vec<InstanceItem>,
        store: &PredictionStore,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut pending = Vec::new();
        for instance in instances {
            if store.contains(&instance.instance_id).await {
                log::info!("Skipping {}, prediction exists", instance.instance_id);
                summary.skipped += 1;
            } else {
                pending.push(instance);
            }
        }

        let workers = self.settings.evaluation.max_workers.max(1);
        log::info!("Solving {} instances with {} workers", pending.len(), workers);

        let results: Vec<(String, Result<RunResult>)> = stream::iter(pending)
            .map(|instance| async move {
                let result = self.solve(&instance).await;
                (instance.instance_id, result)
            })
            .buffer_unordered(workers)
            .collect()
            .await;

        for (instance_id, result) in results {
            match result {
                Ok(result) => {
                    store.emit(&result).await?;
                    summary.completed += 1;
                }
                Err(e) => {
                    log::error!("[{}] aborted: {}", instance_id, e);
                    summary.aborted.push((instance_id, abort_reason(&e)));
                }
            }
        }

        store.save().await?;
        Ok(summary)
    }
}

fn abort_reason(e: &ResolveError) -> String {
    if e.is_fatal() {
        format!("fatal: {}", e)
    } else {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::embedding::{Embedder, HashingEmbedder};
    use crate::resolve::checkpoint::{Checkpoint, MemoryCheckpointer};
    use crate::resolve::handlers::testing::ScriptedOracle;
    use crate::resolve::retrieval::FsCorpus;
    use crate::resolve::state::StatePatch;
    use crate::resolve::types::{RunStatus, TaskType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// Hashing embedder that stalls on any text containing `slow_marker`
    struct StallingEmbedder {
        inner: HashingEmbedder,
        delay: Duration,
    }

    #[async_trait]
    impl Embedder for StallingEmbedder {
        fn name(&self) -> &str {
            "stalling"
        }

        async fn embed(&self, texts: &[String]) -> crate::adk::error::Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("slow_marker")) {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.embed(texts).await
        }
    }

    /// Counts corpus walks
    struct CountingCorpus {
        inner: FsCorpus,
        walks: AtomicUsize,
    }

    impl CorpusProvider for CountingCorpus {
        fn load_chunks(
            &self,
            repo_path: &Path,
        ) -> crate::adk::error::Result<Vec<crate::resolve::types::Chunk>> {
            self.walks.fetch_add(1, Ordering::SeqCst);
            self.inner.load_chunks(repo_path)
        }
    }

    fn repo_with(root: &Path, name: &str, body: &str) -> PathBuf {
        let repo = root.join(name);
        std::fs::create_dir_all(repo.join("src")).unwrap();
        std::fs::write(repo.join("src/main.py"), body).unwrap();
        repo
    }

    fn stalling_runner(root: &Path, corpus: Arc<CountingCorpus>) -> WorkflowRunner {
        let settings = Settings {
            repo_clone_path: root.to_path_buf(),
            ..Default::default()
        };
        WorkflowRunner::new(
            Arc::new(settings),
            Arc::new(ScriptedOracle::new()),
            Arc::new(TokenBudgeter::cl100k().unwrap()),
            Arc::new(StallingEmbedder {
                inner: HashingEmbedder::new(64),
                delay: Duration::from_secs(2),
            }),
            corpus,
            Arc::new(MemoryCheckpointer::new()),
        )
    }

    fn counting_corpus() -> Arc<CountingCorpus> {
        Arc::new(CountingCorpus {
            inner: FsCorpus::from_settings(&Settings::default().retrieval),
            walks: AtomicUsize::new(0),
        })
    }

    fn instance(id: &str) -> InstanceItem {
        InstanceItem {
            instance_id: id.to_string(),
            repo: "acme/parser".to_string(),
            base_commit: "abc".to_string(),
            problem_statement: "fix off-by-one in parser".to_string(),
        }
    }

    fn runner(root: &Path, checkpointer: Arc<dyn Checkpointer>) -> WorkflowRunner {
        let settings = Settings {
            repo_clone_path: root.to_path_buf(),
            ..Default::default()
        };
        WorkflowRunner::new(
            Arc::new(settings.clone()),
            Arc::new(ScriptedOracle::new()),
            Arc::new(TokenBudgeter::cl100k().unwrap()),
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(FsCorpus::from_settings(&settings.retrieval)),
            checkpointer,
        )
    }

    #[tokio::test]
    async fn test_missing_repo_is_aborted() {
        let dir = TempDir::new().unwrap();
        let store = PredictionStore::load(dir.path().join("p.json"), "m").await.unwrap();
        let r = runner(dir.path(), Arc::new(MemoryCheckpointer::new()));

        let summary = r.run_all(vec![instance("demo-1")], &store).await.unwrap();
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.aborted.len(), 1);
        assert!(summary.aborted[0].1.starts_with("fatal:"));
        assert!(store.predictions().await.is_empty());
    }

    #[tokio::test]
    async fn test_finished_checkpoint_is_reported_without_index() {
        let dir = TempDir::new().unwrap();
        let checkpointer = Arc::new(MemoryCheckpointer::new());
        let state = WorkflowState::new(&instance("demo-1"), "nowhere").merge(&StatePatch {
            generated_patch: Some("diff --git a/x b/x".to_string()),
            ..StatePatch::next(TaskType::Complete)
        });
        checkpointer.save(&Checkpoint::new("demo-1", state)).await.unwrap();

        let r = runner(dir.path(), checkpointer);
        let result = r.solve(&instance("demo-1")).await.unwrap();
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.patch, "diff --git a/x b/x");
    }

    #[tokio::test]
    async fn test_existing_predictions_skipped() {
        let dir = TempDir::new().unwrap();
        let store = PredictionStore::load(dir.path().join("p.json"), "m").await.unwrap();
        store
            .emit(&RunResult {
                instance_id: "demo-1".to_string(),
                patch: String::new(),
                status: RunStatus::Failed,
            })
            .await
            .unwrap();

        let r = runner(dir.path(), Arc::new(MemoryCheckpointer::new()));
        let summary = r.run_all(vec![instance("demo-1")], &store).await.unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(summary.aborted.is_empty());
    }

    #[tokio::test]
    async fn test_cached_index_not_blocked_by_other_build() {
        let dir = TempDir::new().unwrap();
        let fast = repo_with(dir.path(), "fast", "def parse(x):\n    return x\n");
        let slow = repo_with(dir.path(), "slow", "def slow_marker():\n    pass\n");
        let r = stalling_runner(dir.path(), counting_corpus());

        r.index_for(&fast).await.unwrap();

        let (slow_result, cached_wait) = tokio::join!(r.index_for(&slow), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let started = Instant::now();
            r.index_for(&fast).await.unwrap();
            started.elapsed()
        });

        assert!(slow_result.is_ok());
        assert!(
            cached_wait < Duration::from_millis(500),
            "cached lookup waited {:?}",
            cached_wait
        );
    }

    #[tokio::test]
    async fn test_concurrent_lookups_build_once() {
        let dir = TempDir::new().unwrap();
        let repo = repo_with(dir.path(), "parser", "def parse(x):\n    return x\n");
        let corpus = counting_corpus();
        let r = stalling_runner(dir.path(), corpus.clone());

        let (a, b) = tokio::join!(r.index_for(&repo), r.index_for(&repo));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(corpus.walks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_retried() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("later");
        let corpus = counting_corpus();
        let r = stalling_runner(dir.path(), corpus.clone());

        assert!(r.index_for(&missing).await.is_err());
        repo_with(dir.path(), "later", "def parse(x):\n    return x\n");
        assert!(r.index_for(&missing).await.is_ok());
        assert_eq!(corpus.walks.load(Ordering::SeqCst), 2);
    }
}
