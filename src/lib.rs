// SPDX-License-Identifier: MIT

//! resolve-rs: an automated issue-resolution loop.
//!
//! A [`resolve::router::Router`] cycles decide, analyze, edit and review step
//! handlers over a shared [`resolve::state::WorkflowState`] until a patch is
//! approved or the loop gives up. Code context comes from a hybrid
//! lexical/dense retriever over the target repository.

pub mod adk;
pub mod resolve;
