// SPDX-License-Identifier: MIT

//! Embedding providers for the dense ranker.
//!
//! [`OpenAIEmbedder`] calls the `/embeddings` endpoint in batches.
//! [`HashingEmbedder`] is a deterministic offline fallback: hashed term
//! frequencies projected into a fixed number of buckets.

use crate::adk::error::{ModelError, ResolveError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_BATCH_SIZE: usize = 64;

/// Dimension used by the offline hashing embedder
pub const HASHING_DIMENSIONS: usize = 512;

/// Turns text into fixed-length vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier used in logs
    fn name(&self) -> &str;

    /// Embed every text, preserving input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Pick an embedder for the configured embeddings model.
///
/// `hashing` selects the offline embedder explicitly. Any other name uses the
/// OpenAI endpoint when `OPENAI_API_KEY` is set, otherwise falls back to
/// hashing.
pub fn embedder_for(model_name: &str) -> Arc<dyn Embedder> {
    if model_name.eq_ignore_ascii_case("hashing") {
        return Arc::new(HashingEmbedder::new(HASHING_DIMENSIONS));
    }
    match OpenAIEmbedder::new(model_name.to_string()) {
        Ok(embedder) => Arc::new(embedder),
        Err(e) => {
            log::warn!(
                "Embeddings model {} unavailable ({}), using hashing embedder",
                model_name,
                e
            );
            Arc::new(HashingEmbedder::new(HASHING_DIMENSIONS))
        }
    }
}

/// OpenAI embeddings API client
pub struct OpenAIEmbedder {
    client: Client,
    api_key: String,
    model_name: String,
    base_url: String,
}

impl OpenAIEmbedder {
    /// Requires `OPENAI_API_KEY`; honours `OPENAI_BASE_URL`.
    pub fn new(model_name: String) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| ModelError::ApiKeyMissing("openai".to_string()))?;
        let base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());

        Ok(Self {
            client: Client::new(),
            api_key,
            model_name,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn parse_embeddings(response: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
        let data = response["data"]
            .as_array()
            .ok_or_else(|| ModelError::InvalidResponse("no data in embeddings response".into()))?;

        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for (position, item) in data.iter().enumerate() {
            let index = item["index"].as_u64().map_or(position, |i| i as usize);
            let vector = item["embedding"]
                .as_array()
                .ok_or_else(|| ModelError::InvalidResponse("embedding is not an array".into()))?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            indexed.push((index, vector));
        }

        if indexed.len() != expected {
            return Err(ModelError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                expected,
                indexed.len()
            ))
            .into());
        }

        indexed.sort_by_key(|(i, _)| *i);
        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(OPENAI_BATCH_SIZE) {
            let body = json!({ "model": self.model_name, "input": batch });
            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await?;

            if !resp.status().is_success() {
                let text = resp.text().await?;
                return Err(ResolveError::api("openai", text));
            }

            let resp_json: serde_json::Value = resp.json().await?;
            out.extend(Self::parse_embeddings(&resp_json, batch.len())?);
        }

        log::debug!("Embedded {} texts with {}", texts.len(), self.model_name);
        Ok(out)
    }
}

/// Feature-hashed term-frequency vectors, L2-normalised
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn bucket(&self, term: &str) -> usize {
        let digest = blake3::hash(term.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(prefix) % self.dimensions as u64) as usize
    }

    /// Embed a single text synchronously
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut tf: HashMap<String, f32> = HashMap::new();
        for term in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| s.len() >= 2)
        {
            *tf.entry(term.to_lowercase()).or_default() += 1.0;
        }

        let mut vec = vec![0.0f32; self.dimensions];
        for (term, count) in &tf {
            // Dampen repeated terms
            vec[self.bucket(term)] += 1.0 + count.ln();
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
