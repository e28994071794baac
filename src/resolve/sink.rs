// SPDX-License-Identifier: MIT

//! Result sink and the JSON prediction store

use crate::adk::error::Result;
use crate::resolve::state::WorkflowState;
use crate::resolve::types::{RunResult, RunStatus, TaskType};
use crate::resolve::validate::is_invalid_marker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Receives one result per finished instance
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn emit(&self, result: &RunResult) -> Result<()>;
}

/// Result reported for a final state.
///
/// `complete` is a success; `failed` or any recorded failure reason is a
/// failure; anything else is partial. Invalid-patch markers are never emitted
/// as patch text.
pub fn run_result(state: &WorkflowState) -> RunResult {
    let status = if state.current_task == TaskType::Complete {
        RunStatus::Success
    } else if state.current_task == TaskType::Failed || state.has_failure() {
        RunStatus::Failed
    } else {
        RunStatus::Partial
    };

    let patch = if is_invalid_marker(&state.generated_patch) {
        String::new()
    } else {
        state.generated_patch.clone()
    };

    RunResult {
        instance_id: state.instance_id.clone(),
        patch,
        status,
    }
}

/// One line of a predictions file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub instance_id: String,
    pub model_name_or_path: String,
    pub model_patch: String,
    #[serde(default = "default_status")]
    pub status: RunStatus,
}

fn default_status() -> RunStatus {
    RunStatus::Partial
}

/// Predictions kept in memory and persisted as a JSON array
pub struct PredictionStore {
    path: PathBuf,
    model_name: String,
    predictions: Mutex<Vec<Prediction>>,
}

impl PredictionStore {
    /// Open the store at `path`, reading any predictions already written there
    pub async fn load(path: impl Into<PathBuf>, model_name: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let predictions = if tokio::fs::try_exists(&path).await? {
            let text = tokio::fs::read_to_string(&path).await?;
            if text.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            Vec::new()
        };

        log::info!(
            "Loaded {} existing predictions from {}",
            predictions.len(),
            path.display()
        );
        Ok(Self {
            path,
            model_name: model_name.into(),
            predictions: Mutex::new(predictions),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn contains(&self, instance_id: &str) -> bool {
        self.predictions
            .lock()
            .await
            .iter()
            .any(|p| p.instance_id == instance_id)
    }

    pub async fn predictions(&self) -> Vec<Prediction> {
        self.predictions.lock().await.clone()
    }

    /// Write every prediction to disk, creating parent directories
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let predictions = self.predictions.lock().await;
        let json = serde_json::to_string_pretty(&*predictions)?;
        tokio::fs::write(&self.path, json).await?;
        log::info!("Saved {} predictions to {}", predictions.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl ResultSink for PredictionStore {
    async fn emit(&self, result: &RunResult) -> Result<()> {
        let mut predictions = self.predictions.lock().await;
        if predictions.iter().any(|p| p.instance_id == result.instance_id) {
            log::warn!("Prediction for {} already recorded, skipping", result.instance_id);
            return Ok(());
        }
        predictions.push(Prediction {
            instance_id: result.instance_id.clone(),
            model_name_or_path: self.model_name.clone(),
            model_patch: result.patch.clone(),
            status: result.status,
        });
        Ok(())
    }
}
