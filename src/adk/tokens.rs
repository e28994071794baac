// SPDX-License-Identifier: MIT

//! Token counting and truncation against token/character ceilings.

use crate::adk::error::{ResolveError, Result};
use tiktoken_rs::CoreBPE;

const ELLIPSIS: &str = "...";

/// Counts and truncates text with a tiktoken encoder
pub struct TokenBudgeter {
    bpe: CoreBPE,
}

impl TokenBudgeter {
    /// Encoder matching `model_name`.
    ///
    /// DeepSeek models use the GPT-4 encoding; unknown names fall back to
    /// `cl100k_base`.
    pub fn for_model(model_name: &str) -> Result<Self> {
        let lookup = if model_name.to_lowercase().contains("deepseek") {
            "gpt-4"
        } else {
            model_name
        };

        let bpe = match tiktoken_rs::get_bpe_from_model(lookup) {
            Ok(bpe) => bpe,
            Err(_) => {
                log::debug!("No tokenizer for {}, using cl100k_base", model_name);
                tiktoken_rs::cl100k_base().map_err(|e| ResolveError::Tokenizer(e.to_string()))?
            }
        };
        Ok(Self { bpe })
    }

    /// Encoder for `cl100k_base`
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().map_err(|e| ResolveError::Tokenizer(e.to_string()))?;
        Ok(Self { bpe })
    }

    /// Number of tokens in `text`
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Clamp `text` to `max_tokens` tokens and, if given, `max_chars` characters.
    ///
    /// Text that already fits is returned unchanged. Otherwise the kept prefix
    /// is right-trimmed and followed by an ellipsis, as long as the ellipsis
    /// still fits inside both limits.
    pub fn truncate(&self, text: &str, max_tokens: usize, max_chars: Option<usize>) -> String {
        if text.is_empty() {
            return String::new();
        }

        let tokens = self.bpe.encode_ordinary(text);
        let char_len = text.chars().count();
        let fits_chars = max_chars.map_or(true, |limit| char_len <= limit);
        if tokens.len() <= max_tokens && fits_chars {
            return text.to_string();
        }

        // Decode the first `n` tokens, backing off until the bytes form valid UTF-8
        let decode_prefix = |toks: &[_], mut n: usize| -> (String, usize) {
            loop {
                if n == 0 {
                    return (String::new(), 0);
                }
                if let Ok(s) = self.bpe.decode(toks[..n].to_vec()) {
                    return (s, n);
                }
                n -= 1;
            }
        };

        // Token-first clamp
        let (mut prefix, _) = decode_prefix(&tokens[..], tokens.len().min(max_tokens));

        // Character clamp, re-encoded so no token is split
        if let Some(limit) = max_chars {
            if prefix.chars().count() > limit {
                let clamped: String = prefix.chars().take(limit).collect();
                let reencoded = self.bpe.encode_ordinary(&clamped);
                let (mut candidate, mut n) = decode_prefix(&reencoded[..], reencoded.len());
                while candidate.chars().count() > limit && n > 0 {
                    (candidate, n) = decode_prefix(&reencoded[..], n - 1);
                }
                prefix = candidate;
            }
        }

        self.with_ellipsis(prefix, max_tokens, max_chars)
    }

    /// Append the ellipsis to a trimmed prefix, shortening the prefix until the
    /// result fits both limits. Falls back to the bare prefix when the
    /// ellipsis alone would not fit.
    fn with_ellipsis(&self, prefix: String, max_tokens: usize, max_chars: Option<usize>) -> String {
        let fits = |s: &str| {
            self.count(s) <= max_tokens && max_chars.map_or(true, |l| s.chars().count() <= l)
        };

        let mut base = prefix.trim_end().to_string();
        loop {
            let candidate = format!("{}{}", base, ELLIPSIS);
            if fits(&candidate) {
                return candidate;
            }
            if base.is_empty() {
                break;
            }
            let mut chars = base.chars();
            chars.next_back();
            base = chars.as_str().trim_end().to_string();
        }

        // The ellipsis cannot fit; return the largest plain prefix that does
        let mut plain = prefix;
        while !fits(&plain) {
            plain.pop();
        }
        plain
    }
}
