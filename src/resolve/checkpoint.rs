// SPDX-License-Identifier: MIT

//! Run checkpoints - the full state snapshotted after every merge

use crate::adk::error::{Result, WorkflowError};
use crate::resolve::state::WorkflowState;
use crate::resolve::types::TaskType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// One routing decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// Dispatch number that produced this transition, starting at 1
    pub step: u32,
    pub from: TaskType,
    pub to: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Durable snapshot of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub state: WorkflowState,
    /// Handler dispatches so far
    pub steps: u32,
    pub transitions: Vec<TransitionRecord>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(run_id: impl Into<String>, state: WorkflowState) -> Self {
        Self {
            run_id: run_id.into(),
            state,
            steps: 0,
            transitions: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.current_task.is_terminal()
    }
}

/// Storage for checkpoints keyed by run id
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// `Ok(None)` when nothing is stored for `run_id`
    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>>;
}

/// Process-local checkpoints
#[derive(Default)]
pub struct MemoryCheckpointer {
    runs: RwLock<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.runs
            .write()
            .await
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }
}

/// One JSON file per run, replaced atomically on every save
pub struct FileCheckpointer {
    dir: PathBuf,
}

impl FileCheckpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Readable, sanitised run id plus a digest of the raw id, so ids that
    /// sanitise alike still get distinct files
    fn path_for(&self, run_id: &str) -> PathBuf {
        let safe: String = run_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
            .collect();
        let digest = blake3::hash(run_id.as_bytes()).to_hex();
        self.dir.join(format!("{}-{}.json", safe, &digest.as_str()[..12]))
    }
}

#[async_trait]
impl Checkpointer for FileCheckpointer {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.path_for(&checkpoint.run_id);
        let tmp = self.dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        let body = serde_json::to_vec_pretty(checkpoint)?;

        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &target).await?;
        log::debug!(
            "Checkpointed run {} at step {} -> {}",
            checkpoint.run_id,
            checkpoint.steps,
            target.display()
        );
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path_for(run_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            WorkflowError::CheckpointCorrupt {
                run_id: run_id.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}
