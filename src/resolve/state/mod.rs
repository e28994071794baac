// SPDX-License-Identifier: MIT

//! Shared workflow state
//!
//! This module provides:
//! - `MergePolicy` / `StateField` - the static per-field merge table
//! - `WorkflowState` - the record threaded through the loop
//! - `StatePatch` - the partial update a step handler returns

mod schema;
mod store;

pub use schema::{MergePolicy, StateField};
pub use store::{StatePatch, WorkflowState};
