// src/config.rs
//
// Configuration knobs read by the retrieval core. The host loads these from
// wherever it likes (file, env); the core only consumes the values.

use serde::Deserialize;

use crate::chunker::ChunkStrategy;

/// Configuration for the retrieval pipeline.
///
/// Every field has a serde default so a partial config file deserializes
/// cleanly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk length in words (word/sentence/paragraph strategies all
    /// budget in words).
    pub chunk_max_length: usize,
    /// Overlap between consecutive chunks, in words.
    pub chunk_overlap: usize,
    /// Chunking strategy applied at document processing time.
    pub chunking_strategy: ChunkStrategy,
    /// Expected embedding dimensionality (model-defined).
    pub embedding_dim: usize,
    /// Weight of the semantic signal in hybrid combination.
    pub semantic_weight: f64,
    /// Weight of the keyword signal in hybrid combination.
    pub keyword_weight: f64,
    /// Minimum cosine similarity for a stored-index search hit.
    pub similarity_threshold: f32,
    /// Query cache time-to-live in seconds.
    pub cache_ttl_secs: u64,
    /// Maximum number of query cache entries.
    pub cache_max_size: usize,
    /// Maximum number of embedding cache entries.
    pub embedding_cache_size: usize,
    /// Embedding cache time-to-live in seconds.
    pub embedding_cache_ttl_secs: u64,
    /// Maximum number of documents a single query may target.
    pub max_documents_per_query: usize,
    /// Maximum query length in characters.
    pub max_query_chars: usize,
    /// Character budget for the assembled prompt context.
    pub max_context_chars: usize,
    /// Expand the keyword-search query with synonyms before searching.
    pub expand_queries: bool,
    /// Apply the source-diversity re-ranking pass after hybrid combination.
    pub rerank_for_diversity: bool,
    /// Score multiplier applied to results from an already-seen document
    /// during the diversity pass.
    pub diversity_penalty: f64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_max_length: 300,
            chunk_overlap: 50,
            chunking_strategy: ChunkStrategy::Word,
            embedding_dim: 384,
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            similarity_threshold: 0.1,
            cache_ttl_secs: 3600,
            cache_max_size: 1000,
            embedding_cache_size: 500,
            embedding_cache_ttl_secs: 1800,
            max_documents_per_query: 20,
            max_query_chars: 2000,
            max_context_chars: 12_000,
            expand_queries: false,
            rerank_for_diversity: true,
            diversity_penalty: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.chunk_max_length, 300);
        assert_eq!(config.chunk_overlap, 50);
        assert!((config.semantic_weight + config.keyword_weight - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_deserialize() {
        let config: RagConfig =
            serde_json::from_str(r#"{"chunk_max_length": 100, "expand_queries": true}"#).unwrap();
        assert_eq!(config.chunk_max_length, 100);
        assert!(config.expand_queries);
        // Untouched fields keep their defaults.
        assert_eq!(config.embedding_dim, 384);
    }
}
