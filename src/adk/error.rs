// SPDX-License-Identifier: MIT

//! Typed error handling for resolve-rs
//!
//! Every fallible operation in the crate returns [`Result`]. Step handlers
//! convert their own failures into state patches, so only infrastructure
//! problems (corpus, checkpoints, step ceiling) ever reach a caller.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Top-level error type for resolve-rs
#[derive(Debug, Error)]
pub enum ResolveError {
    /// API errors from model or embedding providers
    #[error("API error from {provider}: {message}")]
    Api { provider: String, message: String },

    /// Configuration errors (missing env vars, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Workflow-specific errors
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// Model/provider errors
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// Tokenizer could not be loaded or failed to encode/decode
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(String),
}

/// Errors raised by the router and the infrastructure around it
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The per-instance dispatch budget was used up
    #[error("Step ceiling of {limit} dispatches exceeded for run '{run_id}'")]
    StepCeilingExceeded { run_id: String, limit: u32 },

    /// No handler registered for a non-terminal task
    #[error("No step handler registered for task '{0}'")]
    MissingHandler(String),

    /// The repository corpus could not be loaded or is empty
    #[error("Corpus unavailable at {path}: {reason}")]
    CorpusUnavailable { path: String, reason: String },

    /// A stored checkpoint could not be decoded
    #[error("Checkpoint for run '{run_id}' is corrupt: {reason}")]
    CheckpointCorrupt { run_id: String, reason: String },

    /// No checkpoint stored under the requested run id
    #[error("No checkpoint found for run '{0}'")]
    CheckpointMissing(String),

    /// No registered provider matches a model name
    #[error("No provider found for model: {0}")]
    UnknownProvider(String),
}

/// Model/LLM-specific errors
#[derive(Debug, Error)]
pub enum ModelError {
    /// API key not configured
    #[error("API key not configured for provider: {0}")]
    ApiKeyMissing(String),

    /// Model not supported by the selected provider
    #[error("Model not supported: {0}")]
    UnsupportedModel(String),

    /// Invalid response from model
    #[error("Invalid response from model: {0}")]
    InvalidResponse(String),
}

impl ResolveError {
    /// Create an API error
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Whether the error aborts an instance before or during the loop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Workflow(
                WorkflowError::StepCeilingExceeded { .. }
                    | WorkflowError::CorpusUnavailable { .. }
                    | WorkflowError::CheckpointCorrupt { .. }
                    | WorkflowError::MissingHandler(_)
            )
        )
    }
}

impl From<&str> for ResolveError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for ResolveError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}
