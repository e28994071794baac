// SPDX-License-Identifier: MIT

//! Provider registry - picks a model implementation from its name.
//!
//! Entries are checked in registration order and the first matcher that
//! accepts the model name wins. Resolution happens once at startup; the
//! resulting model is shared by every run.

use crate::adk::error::{Result, WorkflowError};
use crate::adk::model::anthropic::AnthropicModel;
use crate::adk::model::ollama::OllamaModel;
use crate::adk::model::openai::OpenAIModel;
use crate::adk::model::Model;
use std::sync::Arc;

/// Options a provider constructor may need
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub model_name: String,
    pub deepseek_base_url: String,
}

type Matcher = fn(&str) -> bool;
type Constructor = fn(&ProviderOptions) -> Result<Arc<dyn Model>>;

/// A registered provider
pub struct ProviderEntry {
    pub name: &'static str,
    matcher: Matcher,
    constructor: Constructor,
}

/// Ordered list of model providers
pub struct ProviderRegistry {
    providers: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Registry with the built-in providers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "openai",
            |m| m.starts_with("gpt-") || m.starts_with("o1") || m.starts_with("o3"),
            |o| Ok(Arc::new(OpenAIModel::new(o.model_name.clone())?)),
        );
        registry.register(
            "deepseek",
            |m| m.starts_with("deepseek-"),
            |o| {
                Ok(Arc::new(OpenAIModel::deepseek(
                    o.model_name.clone(),
                    o.deepseek_base_url.clone(),
                )?))
            },
        );
        registry.register(
            "anthropic",
            |m| m.starts_with("claude"),
            |o| Ok(Arc::new(AnthropicModel::new(o.model_name.clone())?)),
        );
        registry.register(
            "ollama",
            |m| m.starts_with("llama") || m.starts_with("qwen") || m.starts_with("mistral"),
            |o| Ok(Arc::new(OllamaModel::new(o.model_name.clone()))),
        );
        registry
    }

    /// Append a provider; earlier registrations take precedence
    pub fn register(&mut self, name: &'static str, matcher: Matcher, constructor: Constructor) {
        self.providers.push(ProviderEntry {
            name,
            matcher,
            constructor,
        });
    }

    /// Name of the first provider accepting `model_name`
    pub fn provider_for(&self, model_name: &str) -> Option<&'static str> {
        self.providers
            .iter()
            .find(|p| (p.matcher)(model_name))
            .map(|p| p.name)
    }

    /// Build the model, either by explicit provider name or by matching
    pub fn resolve(
        &self,
        options: &ProviderOptions,
        provider_override: Option<&str>,
    ) -> Result<Arc<dyn Model>> {
        let entry = match provider_override {
            Some(name) => self
                .providers
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name)),
            None => self
                .providers
                .iter()
                .find(|p| (p.matcher)(&options.model_name)),
        };

        let entry = entry.ok_or_else(|| WorkflowError::UnknownProvider(options.model_name.clone()))?;
        log::info!(
            "Using provider: {} with model: {}",
            entry.name,
            options.model_name
        );
        (entry.constructor)(options)
    }

    /// Registered provider names in precedence order
    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name).collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
