// SPDX-License-Identifier: MIT

//! Ollama Model - local `/api/chat` implementation

use super::{Content, GenerationConfig, Model, Part};
use crate::adk::error::{ModelError, ResolveError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::env;

/// Model served by a local Ollama instance
pub struct OllamaModel {
    client: Client,
    model_name: String,
    base_url: String,
}

impl OllamaModel {
    /// Create a new OllamaModel
    ///
    /// Uses `OLLAMA_BASE_URL`, defaulting to `http://localhost:11434`.
    pub fn new(model_name: String) -> Self {
        let base_url =
            env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string());
        Self {
            client: Client::new(),
            model_name,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn content_to_ollama_message(content: &Content) -> serde_json::Value {
        let role = match content.role.as_str() {
            "model" => "assistant",
            other => other,
        };
        json!({ "role": role, "content": content.text() })
    }

    fn parse_ollama_response(response: &serde_json::Value) -> Result<Content> {
        let text = response["message"]["content"]
            .as_str()
            .ok_or_else(|| ModelError::InvalidResponse("no message in response".to_string()))?;

        let parts = if text.is_empty() {
            vec![]
        } else {
            vec![Part::Text(text.to_string())]
        };

        Ok(Content {
            role: "model".to_string(),
            parts,
        })
    }
}

#[async_trait]
impl Model for OllamaModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate_content(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
    ) -> Result<Content> {
        let url = format!("{}/api/chat", self.base_url);

        let messages: Vec<serde_json::Value> = history
            .iter()
            .map(Self::content_to_ollama_message)
            .collect();

        let mut body = json!({
            "model": self.model_name,
            "messages": messages,
            "stream": false
        });

        if let Some(temp) = config.and_then(|c| c.temperature) {
            body["options"] = json!({ "temperature": temp });
        }

        let resp = self.client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let text = resp.text().await?;
            return Err(ResolveError::api("ollama", text));
        }

        let resp_json: serde_json::Value = resp.json().await?;
        log::debug!("Ollama response: {}", resp_json);

        Self::parse_ollama_response(&resp_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_role_maps_to_assistant() {
        let content = Content {
            role: "model".to_string(),
            parts: vec![Part::Text("ok".to_string())],
        };
        let msg = OllamaModel::content_to_ollama_message(&content);
        assert_eq!(msg["role"], "assistant");
        assert_eq!(msg["content"], "ok");
    }

    #[test]
    fn test_parse_chat_response() {
        let response = json!({
            "model": "llama3",
            "message": { "role": "assistant", "content": "parser, off-by-one" },
            "done": true
        });
        let content = OllamaModel::parse_ollama_response(&response).unwrap();
        assert_eq!(content.text(), "parser, off-by-one");
    }

    #[test]
    fn test_parse_missing_message_fails() {
        assert!(OllamaModel::parse_ollama_response(&json!({"done": true})).is_err());
    }
}
