// SPDX-License-Identifier: MIT

//! Dense ranker: cosine similarity over chunk embeddings

use crate::adk::embedding::{cosine_similarity, Embedder};
use crate::adk::error::Result;

/// Embedding vectors, one per chunk, in corpus order
#[derive(Debug, Clone, Default)]
pub struct DenseIndex {
    vectors: Vec<Vec<f32>>,
}

impl DenseIndex {
    pub async fn build(embedder: &dyn Embedder, documents: &[String]) -> Result<Self> {
        let vectors = if documents.is_empty() {
            Vec::new()
        } else {
            embedder.embed(documents).await?
        };
        log::debug!("Dense index built with {}: {} vectors", embedder.name(), vectors.len());
        Ok(Self { vectors })
    }

    pub fn from_vectors(vectors: Vec<Vec<f32>>) -> Self {
        Self { vectors }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// The `k` nearest documents to `query`, best first; ties keep corpus order
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}
