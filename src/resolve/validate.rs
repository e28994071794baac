// SPDX-License-Identifier: MIT

//! Structural checks and parsers for oracle output

use crate::resolve::types::ReviewStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Prefix of the marker an edit stores in place of a rejected patch
pub const INVALID_PREFIX: &str = "INVALID:";

static DIFF_GIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^diff --git").expect("static regex"));
static OLD_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^--- ").expect("static regex"));
static NEW_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\+\+\+ ").expect("static regex"));
static HUNK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^@@ -\d+,\d+ \+\d+,\d+ @@").expect("static regex"));
static DIFF_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^diff --git a/(\S+) b/(\S+)").expect("static regex"));
static VALID_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bVALID\b").expect("static regex"));
static REVIEW_STATUS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)STATUS:\s*(APPROVED|REJECTED)").expect("static regex"));
static KEY_POINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[\s#*-]*(Critical Issue|Proposed Solution|Implementation Step):\s*(.+)$")
        .expect("static regex")
});
static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:diff|patch)?[^\n]*\n(.*?)```").expect("static regex"));

/// A patch needs a `diff --git` line, `---`/`+++` markers and a hunk header
pub fn has_diff_structure(patch: &str) -> bool {
    DIFF_GIT.is_match(patch)
        && OLD_FILE.is_match(patch)
        && NEW_FILE.is_match(patch)
        && HUNK.is_match(patch)
}

/// Whether a validation answer accepts.
///
/// Matches `VALID` as a whole word, so `INVALID` is a rejection.
pub fn is_valid_verdict(response: &str) -> bool {
    VALID_WORD.is_match(response)
}

/// Whether a stored patch is the marker of a rejected edit
pub fn is_invalid_marker(patch: &str) -> bool {
    patch.trim_start().starts_with(INVALID_PREFIX)
}

pub fn invalid_marker(reason: &str) -> String {
    format!("{} {}", INVALID_PREFIX, reason)
}

/// Coarse problem type used to steer edit and review prompts
pub fn classify_problem(problem: &str) -> &'static str {
    let lower = problem.to_lowercase();
    if ["bug", "error", "fix"].iter().any(|kw| lower.contains(kw)) {
        "bug_fix"
    } else if ["feature", "implement", "new"].iter().any(|kw| lower.contains(kw)) {
        "feature_add"
    } else {
        "code_quality"
    }
}

/// The diff inside the first fenced block, or the whole reply
pub fn extract_diff(raw: &str) -> String {
    let body = FENCE
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let trimmed = body.trim_matches('\n').trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed)
    }
}

/// Distinct files named by `diff --git` headers
pub fn files_touched(patch: &str) -> usize {
    DIFF_TARGET
        .captures_iter(patch)
        .filter_map(|c| c.get(2).map(|m| m.as_str()))
        .collect::<HashSet<_>>()
        .len()
}

/// `STATUS: APPROVED|REJECTED`; anything else is a rejection
pub fn parse_review_status(feedback: &str) -> ReviewStatus {
    match REVIEW_STATUS
        .captures(feedback)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
    {
        Some(s) if s == "APPROVED" => ReviewStatus::Approved,
        _ => ReviewStatus::Rejected,
    }
}

/// `Critical Issue`, `Proposed Solution` and `Implementation Step` lines
pub fn extract_key_points(analysis: &str) -> String {
    let points: Vec<String> = KEY_POINT
        .captures_iter(analysis)
        .map(|c| format!("{}: {}", &c[1], c[2].trim()))
        .collect();

    if points.is_empty() {
        "No key points extracted".to_string()
    } else {
        points.join(", ")
    }
}
