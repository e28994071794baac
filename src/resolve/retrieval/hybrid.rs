// SPDX-License-Identifier: MIT

//! Hybrid retrieval: lexical and dense rankings fused, re-ranked by extracted
//! terms and diversified across source files.
//!
//! A [`CorpusIndex`] is built once per repository and never mutated, so one
//! `Arc<CorpusIndex>` can serve any number of concurrent runs. Each run owns
//! its own [`HybridRetriever`] around that shared index.

use super::lexical::Bm25Index;
use super::semantic::DenseIndex;
use super::CorpusProvider;
use crate::adk::embedding::Embedder;
use crate::adk::error::{Result, WorkflowError};
use crate::adk::oracle::Oracle;
use crate::resolve::prompts;
use crate::resolve::types::{Chunk, ChunkKey};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Immutable chunk set with both rankers built over it
pub struct CorpusIndex {
    chunks: Vec<Chunk>,
    lexical: Bm25Index,
    dense: DenseIndex,
    embedder: Arc<dyn Embedder>,
}

impl CorpusIndex {
    /// Load and index a repository.
    ///
    /// A missing repository, an empty corpus or a failed embedding pass are
    /// all reported as [`WorkflowError::CorpusUnavailable`]. The file walk
    /// runs on the blocking pool.
    pub async fn build(
        repo_path: &Path,
        corpus: Arc<dyn CorpusProvider>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let walk_path = repo_path.to_path_buf();
        let chunks = tokio::task::spawn_blocking(move || corpus.load_chunks(&walk_path))
            .await
            .map_err(|e| WorkflowError::CorpusUnavailable {
                path: repo_path.display().to_string(),
                reason: format!("corpus walk panicked: {}", e),
            })??;
        if chunks.is_empty() {
            return Err(WorkflowError::CorpusUnavailable {
                path: repo_path.display().to_string(),
                reason: "no source files to index".to_string(),
            }
            .into());
        }

        Self::from_chunks(chunks, embedder).await.map_err(|e| {
            WorkflowError::CorpusUnavailable {
                path: repo_path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Index an already loaded chunk set
    pub async fn from_chunks(chunks: Vec<Chunk>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let lexical = Bm25Index::build(chunks.iter().map(|c| c.content.as_str()));
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let dense = DenseIndex::build(embedder.as_ref(), &texts).await?;

        Ok(Self {
            chunks,
            lexical,
            dense,
            embedder,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// BM25 top `k`
    pub fn lexical_search(&self, query: &str, k: usize) -> Vec<Chunk> {
        self.lexical
            .search(query, k)
            .into_iter()
            .map(|(i, score)| self.chunks[i].clone().with_score(score))
            .collect()
    }

    /// Cosine top `k` against the embedded query
    pub async fn dense_search(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        let embedded = self.embedder.embed(&[query.to_string()]).await?;
        let Some(vector) = embedded.first() else {
            return Ok(Vec::new());
        };
        Ok(self
            .dense
            .search(vector, k)
            .into_iter()
            .map(|(i, score)| self.chunks[i].clone().with_score(score))
            .collect())
    }
}

/// Per-run retriever over a shared index
pub struct HybridRetriever {
    index: Arc<CorpusIndex>,
    oracle: Arc<dyn Oracle>,
    lexical_candidates: usize,
}

impl HybridRetriever {
    pub fn new(index: Arc<CorpusIndex>, oracle: Arc<dyn Oracle>, lexical_candidates: usize) -> Self {
        Self {
            index,
            oracle,
            lexical_candidates,
        }
    }

    pub fn index(&self) -> &Arc<CorpusIndex> {
        &self.index
    }

    /// Up to `top_k` relevant, source-diverse chunks for a problem.
    ///
    /// Term extraction or dense search failures degrade the result instead of
    /// failing the call.
    pub async fn retrieve(&self, query: &str, feedback: &str, top_k: usize) -> Vec<Chunk> {
        let terms = self.extract_terms(query, feedback).await;
        let focused = formulate_query(query, &terms);

        let lexical = self.index.lexical_search(&focused, self.lexical_candidates);
        let dense = match self.index.dense_search(&focused, top_k).await {
            Ok(chunks) => chunks,
            Err(e) => {
                log::warn!("Dense retrieval failed, using lexical results only: {}", e);
                Vec::new()
            }
        };

        let fused = fuse(lexical, dense);
        let ranked = rerank(fused, &terms);
        let selected = diversify(ranked, top_k);

        log::info!(
            "Retrieved {} chunks from {} sources ({} terms)",
            selected.len(),
            selected.iter().map(|c| c.source.as_str()).collect::<HashSet<_>>().len(),
            terms.len()
        );
        selected
    }

    async fn extract_terms(&self, query: &str, feedback: &str) -> Vec<String> {
        let human = prompts::term_extraction_human(query, feedback);
        match self
            .oracle
            .invoke(prompts::TERM_EXTRACTION_SYSTEM, Some(&human))
            .await
        {
            Ok(response) => parse_terms(&response),
            Err(e) => {
                log::warn!("Term extraction failed, continuing without terms: {}", e);
                Vec::new()
            }
        }
    }
}

/// Comma-separated oracle output to a term list, empties dropped
pub fn parse_terms(response: &str) -> Vec<String> {
    response
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// One retrieval string from the problem and its terms
pub fn formulate_query(query: &str, terms: &[String]) -> String {
    format!("Problem: {} Keywords: {}", query, terms.join(", "))
}

/// Concatenate rankings, keeping the first occurrence of each identity
pub fn fuse(lexical: Vec<Chunk>, dense: Vec<Chunk>) -> Vec<Chunk> {
    let mut seen: HashSet<ChunkKey> = HashSet::new();
    lexical
        .into_iter()
        .chain(dense)
        .filter(|chunk| seen.insert(chunk.key()))
        .collect()
}

/// Stable sort by the number of terms found (case-insensitively) in each
/// chunk; the count becomes the chunk score
pub fn rerank(chunks: Vec<Chunk>, terms: &[String]) -> Vec<Chunk> {
    let lowered: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();

    let mut scored: Vec<(usize, Chunk)> = chunks
        .into_iter()
        .map(|chunk| {
            let content = chunk.content.to_lowercase();
            let hits = lowered.iter().filter(|t| content.contains(t.as_str())).count();
            (hits, chunk)
        })
        .collect();

    scored.sort_by_key(|(hits, _)| Reverse(*hits));
    scored
        .into_iter()
        .map(|(hits, chunk)| chunk.with_score(hits as f32))
        .collect()
}

/// First one chunk per unseen source, then backfill in ranked order
pub fn diversify(ranked: Vec<Chunk>, top_k: usize) -> Vec<Chunk> {
    let mut selected: Vec<Chunk> = Vec::with_capacity(top_k.min(ranked.len()));
    let mut picked: HashSet<ChunkKey> = HashSet::new();
    let mut sources: HashSet<String> = HashSet::new();

    for chunk in &ranked {
        if selected.len() >= top_k {
            break;
        }
        if sources.insert(chunk.source.clone()) {
            picked.insert(chunk.key());
            selected.push(chunk.clone());
        }
    }

    for chunk in ranked {
        if selected.len() >= top_k {
            break;
        }
        if picked.insert(chunk.key()) {
            selected.push(chunk);
        }
    }

    selected
}
