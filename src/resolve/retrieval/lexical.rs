// SPDX-License-Identifier: MIT

//! Okapi BM25 over identifier tokens

use std::collections::HashMap;

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// Lower-cased identifier tokens; snake_case identifiers also yield their parts
pub fn tokenize(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
    {
        let lower = word.to_lowercase();
        if lower.contains('_') {
            out.extend(
                lower
                    .split('_')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
            );
        }
        out.push(lower);
    }
    out
}

/// Inverted index scoring documents by BM25
#[derive(Debug, Clone)]
pub struct Bm25Index {
    /// term -> (document, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    doc_lens: Vec<usize>,
    avg_len: f32,
}

impl Bm25Index {
    pub fn build<'a, I>(documents: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut postings: HashMap<String, Vec<(usize, u32)>> = HashMap::new();
        let mut doc_lens = Vec::new();

        for (doc, text) in documents.into_iter().enumerate() {
            let tokens = tokenize(text);
            doc_lens.push(tokens.len());

            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_default() += 1;
            }
            for (term, count) in tf {
                postings.entry(term).or_default().push((doc, count));
            }
        }

        let total: usize = doc_lens.iter().sum();
        let avg_len = if doc_lens.is_empty() {
            0.0
        } else {
            total as f32 / doc_lens.len() as f32
        };

        Self {
            postings,
            doc_lens,
            avg_len,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    fn idf(&self, df: usize) -> f32 {
        let n = self.doc_lens.len() as f32;
        let df = df as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// BM25 score of every document for `query`
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_lens.len()];
        if self.avg_len <= 0.0 {
            return scores;
        }

        for term in tokenize(query) {
            let Some(posting) = self.postings.get(&term) else {
                continue;
            };
            let idf = self.idf(posting.len());
            for &(doc, tf) in posting {
                let tf = tf as f32;
                let norm = 1.0 - B + B * self.doc_lens[doc] as f32 / self.avg_len;
                scores[doc] += idf * (tf * (K1 + 1.0)) / (tf + K1 * norm);
            }
        }
        scores
    }

    /// The `k` best documents, best first.
    ///
    /// Ties keep document order. Documents with a zero score still fill the
    /// candidate list when fewer than `k` match.
    pub fn search(&self, query: &str, k: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.scores(query).into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}
