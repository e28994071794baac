// SPDX-License-Identifier: MIT

//! Prompt text for every oracle call the loop makes.
//!
//! Each system prompt opens with a fixed header line, so a transcript (or a
//! scripted oracle) can tell the calls apart.

/// Term extraction for retrieval
pub const TERM_EXTRACTION_SYSTEM: &str = "Extract technical terms as comma-separated list";

pub const DECIDE_HEADER: &str = "You are a senior software engineer triaging an issue.";
pub const ANALYSIS_HEADER: &str = "You are a code analyst producing a root-cause analysis.";
pub const ANALYSIS_VALIDATION_SYSTEM: &str = "You check root-cause analyses for quality.\n\
A valid analysis names a Critical Issue, a Proposed Solution and at least one \
Implementation Step grounded in the given code.\n\
Answer with the single word VALID or INVALID.";
pub const EDIT_HEADER: &str = "You write minimal unified diffs that resolve issues.";
pub const PATCH_VALIDATION_SYSTEM: &str = "You check whether a patch resolves a problem.\n\
A valid patch changes the code implicated by the problem and nothing unrelated.\n\
Answer with the single word VALID or INVALID.";
pub const REVIEW_HEADER: &str = "You are a strict code reviewer.";

pub fn term_extraction_human(problem: &str, feedback: &str) -> String {
    format!("Problem: {}\nFeedback: {}", problem, feedback)
}

pub struct DecidePrompt<'a> {
    pub problem: &'a str,
    pub analysis_attempts: u32,
    pub max_attempts: u32,
    pub analysis_summary: &'a str,
    pub review_feedback: &'a str,
    pub docs_summary: &'a str,
}

impl DecidePrompt<'_> {
    pub fn render(&self) -> String {
        format!(
            "{header}\n\n\
## Problem\n{problem}\n\n\
## Progress\nAnalysis attempts: {attempts} of {max}\n\n\
## Previous analyses\n{analysis}\n\n\
## Review feedback\n{feedback}\n\n\
## Retrieved code\n{docs}\n\n\
Reply ANALYZE if the code needs further analysis, or EDIT if it is ready to patch.",
            header = DECIDE_HEADER,
            problem = self.problem,
            attempts = self.analysis_attempts,
            max = self.max_attempts,
            analysis = self.analysis_summary,
            feedback = non_empty(self.review_feedback, "No review feedback"),
            docs = self.docs_summary,
        )
    }
}

pub struct AnalysisPrompt<'a> {
    pub problem: &'a str,
    pub code_context: &'a str,
    pub previous_analysis: &'a str,
    pub review_feedback: &'a str,
    pub attempts_left: u32,
}

impl AnalysisPrompt<'_> {
    pub fn render(&self) -> String {
        format!(
            "{header}\n\n\
## Problem\n{problem}\n\n\
## Code context\n{context}\n\n\
## Previous analysis\n{previous}\n\n\
## Review feedback\n{feedback}\n\n\
Attempts left: {left}\n\n\
Structure the answer as:\n\
Critical Issue: <the defect>\n\
Proposed Solution: <the fix>\n\
Implementation Step: <one line per step>",
            header = ANALYSIS_HEADER,
            problem = self.problem,
            context = self.code_context,
            previous = self.previous_analysis,
            feedback = non_empty(self.review_feedback, "No review feedback"),
            left = self.attempts_left,
        )
    }
}

pub fn edit_system(problem_type: &str, max_files: usize) -> String {
    format!(
        "{}\n\
Problem type: {}\n\
Return one patch in `git diff` format with `diff --git`, `---`/`+++` headers \
and `@@ -a,b +c,d @@` hunks. Touch at most {} files. Do not modify tests.",
        EDIT_HEADER, problem_type, max_files
    )
}

pub struct EditPrompt<'a> {
    pub problem: &'a str,
    pub analysis_summary: &'a str,
    pub code_context: &'a str,
    pub previous_attempts: &'a str,
    pub review_feedback: &'a str,
}

impl EditPrompt<'_> {
    pub fn render(&self) -> String {
        format!(
            "## Problem\n{}\n\n## Analysis\n{}\n\n{}\n\n## Previous attempts\n{}\n\n## Review feedback\n{}",
            self.problem,
            non_empty(self.analysis_summary, "No analysis available"),
            self.code_context,
            self.previous_attempts,
            non_empty(self.review_feedback, "No review feedback"),
        )
    }
}

pub fn patch_validation_human(problem: &str, patch: &str) -> String {
    format!("Problem: {}\nPatch:\n{}", problem, patch)
}

pub fn review_system(max_attempts: u32, problem_type: &str) -> String {
    format!(
        "{}\n\
Problem type: {}. Reviews allowed: {}.\n\
Check correctness, scope and side effects of the patch.\n\
End with a line `STATUS: APPROVED` or `STATUS: REJECTED`, followed by concrete \
feedback when rejecting.",
        REVIEW_HEADER, problem_type, max_attempts
    )
}

pub struct ReviewPrompt<'a> {
    pub problem: &'a str,
    pub patch: &'a str,
    pub previous_feedback: &'a str,
    pub analysis_summary: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
}

impl ReviewPrompt<'_> {
    pub fn render(&self) -> String {
        format!(
            "## Problem\n{}\n\n## Patch\n{}\n\n## Analysis\n{}\n\n## Previous feedback\n{}\n\nReview attempt {} of {}",
            self.problem,
            self.patch,
            non_empty(self.analysis_summary, "No analysis available"),
            self.previous_feedback,
            self.attempt,
            self.max_attempts,
        )
    }
}

fn non_empty<'a>(text: &'a str, fallback: &'a str) -> &'a str {
    if text.trim().is_empty() {
        fallback
    } else {
        text
    }
}
