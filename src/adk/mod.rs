// SPDX-License-Identifier: MIT

//! Agent development kit: the provider-facing layer.
//!
//! Nothing in here knows about issue resolution. The `resolve` module builds
//! on these pieces:
//! - [`model`] - chat model trait and provider clients
//! - [`oracle`] - the single `invoke` capability handlers depend on
//! - [`registry`] - name-matching provider selection
//! - [`tokens`] - token counting and truncation
//! - [`embedding`] - embedders for the dense ranker

pub mod embedding;
pub mod error;
pub mod model;
pub mod oracle;
pub mod registry;
pub mod tokens;
