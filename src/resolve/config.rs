// SPDX-License-Identifier: MIT

//! Settings - YAML configuration for the resolution loop
//!
//! Every field has a default, so an empty document (or no file at all) yields
//! a usable configuration. The camelCase option names are accepted as aliases
//! of the snake_case fields.

use crate::adk::error::{ResolveError, Result};
use crate::adk::registry::ProviderOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub models: ModelSettings,
    pub retrieval: RetrievalSettings,
    pub workflow: WorkflowSettings,
    pub evaluation: EvaluationSettings,
    /// Directory holding checked-out repositories as `<owner>__<name>`
    #[serde(alias = "repoClonePath")]
    pub repo_clone_path: PathBuf,
}

/// Oracle and embedding model selection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelSettings {
    #[serde(alias = "llmModel")]
    pub llm_model: String,
    #[serde(alias = "embeddingsModel")]
    pub embeddings_model: String,
    pub temperature: f32,
    #[serde(alias = "deepseekBaseUrl")]
    pub deepseek_base_url: String,
    /// Provider name overriding prefix matching
    pub provider: Option<String>,
}

/// Corpus chunking and hybrid retrieval
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrievalSettings {
    #[serde(alias = "retrievalTopK")]
    pub top_k: usize,
    /// Candidate count of the lexical ranker
    #[serde(alias = "lexicalCandidates")]
    pub lexical_candidates: usize,
    #[serde(alias = "chunkSize")]
    pub chunk_size: usize,
    #[serde(alias = "chunkOverlap")]
    pub chunk_overlap: usize,
    #[serde(alias = "relevantExtensions")]
    pub relevant_extensions: Vec<String>,
}

/// Loop ceilings and context budgets
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowSettings {
    #[serde(alias = "analysisAttemptCeiling", alias = "max_analysis_attempts")]
    pub analysis_attempt_ceiling: u32,
    #[serde(alias = "reviewAttemptCeiling", alias = "max_review_attempts")]
    pub review_attempt_ceiling: u32,
    #[serde(alias = "maxFilesPerPatch")]
    pub max_files_per_patch: usize,
    #[serde(alias = "maxContextTokens")]
    pub max_context_tokens: usize,
    #[serde(alias = "maxContentLength")]
    pub max_content_length: usize,
    #[serde(alias = "stepCeilingMargin", alias = "recursion_additional_limit")]
    pub step_ceiling_margin: u32,
    /// Tokens charged to `token_count` when a handler fails
    #[serde(alias = "tokenPenalty")]
    pub token_penalty: u64,
}

/// Batch evaluation output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EvaluationSettings {
    #[serde(alias = "predictionsPath")]
    pub predictions_path: PathBuf,
    #[serde(alias = "maxWorkers")]
    pub max_workers: usize,
    /// Directory for run checkpoints; unset keeps them in memory
    #[serde(alias = "checkpointDir")]
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            models: ModelSettings::default(),
            retrieval: RetrievalSettings::default(),
            workflow: WorkflowSettings::default(),
            evaluation: EvaluationSettings::default(),
            repo_clone_path: PathBuf::from("repos"),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            llm_model: "gpt-4-turbo".to_string(),
            embeddings_model: "text-embedding-3-small".to_string(),
            temperature: 0.0,
            deepseek_base_url: "https://api.deepseek.com/v1".to_string(),
            provider: None,
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 15,
            lexical_candidates: 15,
            chunk_size: 1200,
            chunk_overlap: 300,
            relevant_extensions: vec![".py".to_string()],
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            analysis_attempt_ceiling: 3,
            review_attempt_ceiling: 3,
            max_files_per_patch: 20,
            max_context_tokens: 120_000,
            max_content_length: 396_000,
            step_ceiling_margin: 50,
            token_penalty: 500,
        }
    }
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            predictions_path: PathBuf::from("results/predictions.json"),
            max_workers: 4,
            checkpoint_dir: None,
        }
    }
}

impl WorkflowSettings {
    /// Maximum number of handler dispatches for one instance
    pub fn step_ceiling(&self) -> u32 {
        self.analysis_attempt_ceiling
            .saturating_add(self.review_attempt_ceiling)
            .saturating_add(self.step_ceiling_margin)
    }
}

impl Settings {
    /// Load settings from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse and validate settings from a YAML string
    pub fn parse_yaml(content: &str) -> Result<Self> {
        let settings: Settings = if content.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(content)?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workflow.analysis_attempt_ceiling == 0 {
            return Err(ResolveError::config("analysis_attempt_ceiling must be at least 1"));
        }
        if self.workflow.review_attempt_ceiling == 0 {
            return Err(ResolveError::config("review_attempt_ceiling must be at least 1"));
        }
        if self.retrieval.top_k == 0 {
            return Err(ResolveError::config("retrieval top_k must be at least 1"));
        }
        if self.retrieval.chunk_size == 0 || self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            return Err(ResolveError::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.retrieval.chunk_overlap, self.retrieval.chunk_size
            )));
        }
        if self.evaluation.max_workers == 0 {
            return Err(ResolveError::config("max_workers must be at least 1"));
        }
        Ok(())
    }

    /// Options handed to the provider registry
    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            model_name: self.models.llm_model.clone(),
            deepseek_base_url: self.models.deepseek_base_url.clone(),
        }
    }
}
