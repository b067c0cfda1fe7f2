// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! Hybrid search session: BM25 + semantic fusion over a candidate chunk set.
//!
//! A session is built per query from the candidate chunks of the selected
//! documents. Both legs run over the same candidate list, each leg's scores
//! are min-max normalized independently, and the weighted combination is
//! re-sorted. Single-method strategies bypass fusion entirely and return the
//! underlying scorer's ranking untouched.

use std::collections::{HashMap, HashSet};

use log::debug;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::bm25::KeywordSearcher;
use crate::config::RagConfig;
use crate::embedding::Embedder;
use crate::error::RagError;
use crate::index_store::ChunkRecord;
use crate::semantic::SemanticSearcher;
use crate::DocumentId;

/// Search strategy selected per query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Hybrid,
    Semantic,
    Keyword,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Hybrid => "hybrid",
            SearchMethod::Semantic => "semantic",
            SearchMethod::Keyword => "keyword",
        }
    }

    pub fn parse(s: &str) -> Result<Self, RagError> {
        match s {
            "hybrid" => Ok(SearchMethod::Hybrid),
            "semantic" => Ok(SearchMethod::Semantic),
            "keyword" => Ok(SearchMethod::Keyword),
            other => Err(RagError::InvalidInput(format!(
                "unknown search method '{}' (expected hybrid, semantic or keyword)",
                other
            ))),
        }
    }
}

/// A ranked chunk leaving the search session.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk_index: usize,
    pub document: DocumentId,
    pub content: String,
    pub semantic_score: f32,
    pub keyword_score: f32,
    /// The score the ranking is sorted by; equals the single leg's raw score
    /// for non-hybrid strategies.
    pub hybrid_score: f32,
    pub page_number: Option<u32>,
    pub source_file: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Fixed synonym table for lightweight keyword-side query expansion.
static SYNONYMS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, &'static [&'static str]> = HashMap::new();
    table.insert("algorithm", &["method", "technique", "approach"]);
    table.insert("model", &["framework", "architecture", "system"]);
    table.insert("data", &["dataset", "information", "records"]);
    table.insert("analysis", &["evaluation", "assessment", "study"]);
    table.insert("performance", &["accuracy", "efficiency", "effectiveness"]);
    table.insert("research", &["study", "investigation", "experiment"]);
    table.insert("method", &["approach", "technique", "procedure"]);
    table.insert("result", &["outcome", "finding", "conclusion"]);
    table.insert("problem", &["issue", "challenge", "question"]);
    table.insert("solution", &["answer", "resolution", "fix"]);
    table
});

const MAX_EXPANSIONS_PER_TERM: usize = 2;

/// Append up to two synonyms per recognized query term. Used on the keyword
/// leg only; the embedding model handles paraphrase on the semantic side.
pub fn expand_query(query: &str) -> String {
    let mut expanded = query.to_string();
    let mut added: HashSet<&str> = HashSet::new();
    for word in query.to_lowercase().split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if let Some(synonyms) = SYNONYMS.get(word) {
            for synonym in synonyms.iter().take(MAX_EXPANSIONS_PER_TERM) {
                if added.insert(synonym) {
                    expanded.push(' ');
                    expanded.push_str(synonym);
                }
            }
        }
    }
    expanded
}

/// One query's search session over a fixed candidate set.
pub struct HybridSearcher {
    records: Vec<ChunkRecord>,
    keyword: KeywordSearcher,
    semantic: SemanticSearcher,
    semantic_weight: f32,
    keyword_weight: f32,
    expand_queries: bool,
}

impl HybridSearcher {
    /// Build both scorers over the candidate records.
    pub fn new(
        records: Vec<ChunkRecord>,
        embedder: &dyn Embedder,
        config: &RagConfig,
    ) -> Result<Self, RagError> {
        if records.is_empty() {
            return Err(RagError::InvalidInput("hybrid search needs at least one candidate chunk".into()));
        }
        let texts: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
        let keyword = KeywordSearcher::build(&texts)?;
        let semantic = SemanticSearcher::build(&texts, embedder)?;
        Ok(Self {
            records,
            keyword,
            semantic,
            semantic_weight: config.semantic_weight as f32,
            keyword_weight: config.keyword_weight as f32,
            expand_queries: config.expand_queries,
        })
    }

    pub fn candidate_count(&self) -> usize {
        self.records.len()
    }

    /// Run the selected strategy and return the top `k` results.
    pub fn search(
        &self,
        query: &str,
        k: usize,
        method: SearchMethod,
        embedder: &dyn Embedder,
    ) -> Result<Vec<SearchResult>, RagError> {
        match method {
            SearchMethod::Semantic => {
                let hits = self.semantic.search(query, k, embedder)?;
                Ok(self.passthrough(hits, true))
            }
            SearchMethod::Keyword => {
                let hits = self.keyword.search(query, k);
                Ok(self.passthrough(hits, false))
            }
            SearchMethod::Hybrid => self.search_hybrid(query, k, embedder),
        }
    }

    /// Single-leg strategies surface the scorer's ranking unchanged.
    fn passthrough(&self, hits: Vec<(usize, f32)>, is_semantic: bool) -> Vec<SearchResult> {
        hits.into_iter()
            .map(|(position, score)| {
                let mut result = self.result_at(position);
                if is_semantic {
                    result.semantic_score = score;
                } else {
                    result.keyword_score = score;
                }
                result.hybrid_score = score;
                result
            })
            .collect()
    }

    fn search_hybrid(
        &self,
        query: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<SearchResult>, RagError> {
        // Each leg over-fetches so fusion has material to reorder.
        let fetch = usize::min(k.saturating_mul(2).max(k), self.records.len());

        let semantic_hits = self.semantic.search(query, fetch, embedder)?;
        let keyword_query = if self.expand_queries {
            let expanded = expand_query(query);
            if expanded != query {
                debug!("[hybrid] Expanded query for keyword leg: {}", expanded);
            }
            expanded
        } else {
            query.to_string()
        };
        let keyword_hits = self.keyword.search(&keyword_query, fetch);

        let semantic_norm = min_max_normalize(&semantic_hits);
        let keyword_norm = min_max_normalize(&keyword_hits);
        let semantic_raw: HashMap<usize, f32> = semantic_hits.into_iter().collect();
        let keyword_raw: HashMap<usize, f32> = keyword_hits.into_iter().collect();

        let mut positions: Vec<usize> = semantic_norm.keys().chain(keyword_norm.keys()).copied().collect();
        positions.sort_unstable();
        positions.dedup();

        let mut results: Vec<SearchResult> = positions
            .into_iter()
            .map(|position| {
                // A chunk missing from one leg contributes zero there.
                let s = semantic_norm.get(&position).copied().unwrap_or(0.0);
                let w = keyword_norm.get(&position).copied().unwrap_or(0.0);
                let mut result = self.result_at(position);
                result.semantic_score = semantic_raw.get(&position).copied().unwrap_or(0.0);
                result.keyword_score = keyword_raw.get(&position).copied().unwrap_or(0.0);
                result.hybrid_score = self.semantic_weight * s + self.keyword_weight * w;
                result
            })
            .collect();

        results.sort_by(|a, b| {
            b.hybrid_score
                .partial_cmp(&a.hybrid_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        Ok(results)
    }

    fn result_at(&self, position: usize) -> SearchResult {
        let record = &self.records[position];
        SearchResult {
            chunk_index: record.chunk_index,
            document: record.document_id,
            content: record.content.clone(),
            semantic_score: 0.0,
            keyword_score: 0.0,
            hybrid_score: 0.0,
            page_number: record.page_number,
            source_file: record.source_file.clone(),
            metadata: record.extra.clone(),
        }
    }
}

/// Min-max normalize one leg's scores into [0, 1]. A leg with no spread maps
/// every candidate to 1.0.
fn min_max_normalize(hits: &[(usize, f32)]) -> HashMap<usize, f32> {
    if hits.is_empty() {
        return HashMap::new();
    }
    let min = hits.iter().map(|(_, s)| *s).fold(f32::INFINITY, f32::min);
    let max = hits.iter().map(|(_, s)| *s).fold(f32::NEG_INFINITY, f32::max);
    let spread = max - min;
    hits.iter()
        .map(|&(position, score)| {
            let normalized = if spread > f32::EPSILON { (score - min) / spread } else { 1.0 };
            (position, normalized)
        })
        .collect()
}

/// Demote repeat appearances of the same document: the first chunk of each
/// document keeps its score, later ones are multiplied by `penalty`, then the
/// list is re-sorted. Pure reordering; contents are untouched.
pub fn rerank_for_diversity(mut results: Vec<SearchResult>, penalty: f32) -> Vec<SearchResult> {
    let mut seen: HashSet<DocumentId> = HashSet::new();
    for result in &mut results {
        if !seen.insert(result.document) {
            result.hybrid_score *= penalty;
        }
    }
    results.sort_by(|a, b| {
        b.hybrid_score
            .partial_cmp(&a.hybrid_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results
}
