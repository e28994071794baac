// SPDX-License-Identifier: MIT

//! Hybrid retrieval over a repository corpus
//!
//! - [`corpus`] - walks and chunks repository sources
//! - [`lexical`] - BM25 ranker
//! - [`semantic`] - embedding ranker
//! - [`hybrid`] - the shared index and the fusion pipeline

pub mod corpus;
pub mod hybrid;
pub mod lexical;
pub mod semantic;

pub use corpus::FsCorpus;
pub use hybrid::{CorpusIndex, HybridRetriever};

use crate::adk::error::Result;
use crate::resolve::types::Chunk;
use std::path::Path;

/// Source of chunks for a repository.
///
/// Loading must be idempotent, exclude test paths and produce the same chunk
/// boundaries for the same inputs.
pub trait CorpusProvider: Send + Sync {
    fn load_chunks(&self, repo_path: &Path) -> Result<Vec<Chunk>>;
}
