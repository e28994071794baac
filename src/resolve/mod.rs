// SPDX-License-Identifier: MIT

//! Issue resolution workflow: retrieval, step handlers and the router that
//! drives one instance from problem statement to patch.

pub mod checkpoint;
pub mod config;
pub mod handlers;
pub mod prompts;
pub mod retrieval;
pub mod router;
pub mod runner;
pub mod sink;
pub mod state;
pub mod types;
pub mod validate;

pub use config::Settings;
pub use router::{Router, RunOutcome};
pub use runner::WorkflowRunner;
pub use types::{InstanceItem, RunResult, RunStatus, TaskType};
