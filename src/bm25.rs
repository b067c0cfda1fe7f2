// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! Session-scoped BM25 keyword scorer.
//!
//! Built fresh over the candidate chunks of one query, used, then dropped.
//! No posting lists are persisted anywhere. Okapi BM25 with the smoothed IDF
//! `ln((1 + N) / (1 + df)) + 1`, so terms present in every candidate still
//! contribute a small positive weight instead of zeroing out.

use std::collections::HashMap;

use log::debug;

use crate::error::RagError;

const K1: f32 = 1.5;
const B: f32 = 0.75;

/// Lowercase, strip punctuation and symbols, collapse whitespace. Keeps
/// alphanumerics only so "don't" and "dont" score identically.
pub fn preprocess(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokenize(text: &str) -> Vec<String> {
    preprocess(text).split_whitespace().map(str::to_string).collect()
}

/// BM25 scorer over one query's candidate chunk set.
pub struct KeywordSearcher {
    // Term frequencies per chunk, positions matching the candidate order.
    term_frequencies: Vec<HashMap<String, usize>>,
    lengths: Vec<usize>,
    avg_length: f32,
    idf: HashMap<String, f32>,
}

impl KeywordSearcher {
    /// Build term statistics over the candidate chunk texts.
    pub fn build(texts: &[&str]) -> Result<Self, RagError> {
        if texts.is_empty() {
            return Err(RagError::InvalidInput("keyword searcher needs at least one chunk".into()));
        }

        let mut term_frequencies = Vec::with_capacity(texts.len());
        let mut lengths = Vec::with_capacity(texts.len());
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let tokens = tokenize(text);
            lengths.push(tokens.len());
            let mut tf: HashMap<String, usize> = HashMap::new();
            for token in &tokens {
                *tf.entry(token.clone()).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *document_frequency.entry(term.clone()).or_insert(0) += 1;
            }
            term_frequencies.push(tf);
        }

        let n = texts.len() as f32;
        let idf = document_frequency
            .into_iter()
            .map(|(term, df)| {
                let weight = ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0;
                (term, weight)
            })
            .collect();

        let total: usize = lengths.iter().sum();
        let avg_length = if total == 0 { 1.0 } else { total as f32 / n };

        debug!("[bm25] Built keyword statistics over {} chunks", texts.len());
        Ok(Self { term_frequencies, lengths, avg_length, idf })
    }

    pub fn len(&self) -> usize {
        self.term_frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.term_frequencies.is_empty()
    }

    /// Score every candidate against `query`, returning `(position, score)`
    /// pairs sorted descending, truncated to `top_k`. Ties keep candidate
    /// order. Terms absent from a chunk contribute zero, and zero-scoring
    /// chunks are still returned so downstream normalization sees the full
    /// score range.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(usize, f32)> {
        let query_terms = tokenize(query);

        let mut scored: Vec<(usize, f32)> = self
            .term_frequencies
            .iter()
            .enumerate()
            .map(|(position, tf)| {
                let length_norm = 1.0 - B + B * self.lengths[position] as f32 / self.avg_length;
                let mut score = 0.0f32;
                for term in &query_terms {
                    let Some(&frequency) = tf.get(term) else { continue };
                    let Some(&idf) = self.idf.get(term) else { continue };
                    let frequency = frequency as f32;
                    score += idf * (frequency * (K1 + 1.0)) / (frequency + K1 * length_norm);
                }
                (position, score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }
}
