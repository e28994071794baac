// SPDX-License-Identifier: MIT

//! The oracle capability: one text-in, text-out call per invocation.
//!
//! Step handlers and the retrieval engine never talk to a [`Model`] directly.
//! They hold an `Arc<dyn Oracle>` so tests can swap in scripted responses.

use crate::adk::error::{ModelError, Result};
use crate::adk::model::{Content, GenerationConfig, Model};
use async_trait::async_trait;
use std::sync::Arc;

/// Opaque text-completion service
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send a system prompt and optional human turn, returning the reply text.
    ///
    /// Implementations must not retry; callers decide what a failure means.
    async fn invoke(&self, system: &str, human: Option<&str>) -> Result<String>;
}

/// Oracle backed by a chat [`Model`]
pub struct ModelOracle {
    model: Arc<dyn Model>,
    config: GenerationConfig,
}

impl ModelOracle {
    pub fn new(model: Arc<dyn Model>, config: GenerationConfig) -> Self {
        Self { model, config }
    }

    /// Name of the wrapped model
    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }
}

#[async_trait]
impl Oracle for ModelOracle {
    async fn invoke(&self, system: &str, human: Option<&str>) -> Result<String> {
        let mut history = vec![Content::system(system)];
        if let Some(text) = human {
            history.push(Content::user(text));
        }

        let response = self
            .model
            .generate_content(&history, Some(&self.config))
            .await?;

        let text = response.text();
        if text.trim().is_empty() {
            return Err(ModelError::InvalidResponse(format!(
                "{} returned an empty completion",
                self.model.model_name()
            ))
            .into());
        }
        Ok(text)
    }
}
