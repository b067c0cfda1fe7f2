// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! Retrieval service facade: the host-facing surface of the crate.
//!
//! Owns the embedder (wrapped in its cache), the document index store and the
//! query cache, and wires the per-query pipeline together: validate, check
//! the cache, load candidates, run the hybrid session, re-rank, assemble the
//! prompt and call the generative model. Document processing and deletion
//! invalidate exactly the cache entries that used the touched document.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::answer::{generate_answer, AnswerOutcome, GenerativeModel, RagAnswer};
use crate::chunker::{Chunker, PageText};
use crate::config::RagConfig;
use crate::embedding::{CachedEmbedder, Embedder};
use crate::error::RagError;
use crate::hybrid::{rerank_for_diversity, HybridSearcher, SearchMethod, SearchResult};
use crate::index_store::{ChunkRecord, DocumentIndexStore, IndexSearchResult};
use crate::query_cache::{CacheStats, QueryCache};
use crate::DocumentId;

/// Store and cache counters surfaced to the host.
#[derive(Debug, Clone, Copy)]
pub struct ServiceStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub query_cache: CacheStats,
}

pub struct RetrievalService {
    embedder: CachedEmbedder<Arc<dyn Embedder>>,
    store: DocumentIndexStore,
    cache: QueryCache<RagAnswer>,
    config: RagConfig,
}

impl RetrievalService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index_dir: &Path,
        config: RagConfig,
    ) -> Result<Self, RagError> {
        if embedder.dim() != config.embedding_dim {
            return Err(RagError::InvalidInput(format!(
                "embedder dimensionality {} does not match configured {}",
                embedder.dim(),
                config.embedding_dim
            )));
        }
        let store = DocumentIndexStore::new(index_dir, config.similarity_threshold)?;
        let cache = QueryCache::new(config.cache_max_size, Duration::from_secs(config.cache_ttl_secs));
        let embedder = CachedEmbedder::new(
            embedder,
            config.embedding_cache_size,
            Duration::from_secs(config.embedding_cache_ttl_secs),
        );
        Ok(Self { embedder, store, cache, config })
    }

    /// Chunk and index one document's extracted text, replacing any previous
    /// index for the same id. Returns the number of chunks indexed.
    pub fn process_document(
        &self,
        document: DocumentId,
        source_file: &str,
        text: &str,
    ) -> Result<usize, RagError> {
        let chunker = self.chunker()?;
        let chunks = chunker.chunk(document, text);
        let count = self.store.build(document, source_file, &chunks, &self.embedder)?;
        self.cache.invalidate(&[document]);
        Ok(count)
    }

    /// Page-attributed variant for extractors that preserve page boundaries.
    pub fn process_document_pages(
        &self,
        document: DocumentId,
        source_file: &str,
        pages: &[PageText],
    ) -> Result<usize, RagError> {
        let chunker = self.chunker()?;
        let chunks = chunker.chunk_pages(document, pages);
        let count = self.store.build(document, source_file, &chunks, &self.embedder)?;
        self.cache.invalidate(&[document]);
        Ok(count)
    }

    /// Remove a document's index and every cached answer that used it.
    pub fn delete_document(&self, document: DocumentId) -> Result<(), RagError> {
        self.store.delete(document)?;
        self.cache.invalidate(&[document]);
        Ok(())
    }

    /// Answer a question over the selected documents.
    pub fn query(
        &self,
        query: &str,
        documents: &[DocumentId],
        k: usize,
        method: SearchMethod,
        model: &dyn GenerativeModel,
    ) -> Result<RagAnswer, RagError> {
        self.validate_query(query, documents, k)?;

        // The strategy shapes the answer, so it is part of the key.
        let key = QueryCache::<RagAnswer>::key(
            &format!("{}\x1f{}", method.as_str(), query),
            documents,
            k,
        );
        if let Some(cached) = self.cache.get(&key) {
            debug!("[service] Returning cached answer");
            return Ok(cached);
        }

        let results = self.search(query, documents, k, method)?;
        let answer = generate_answer(model, query, &results, self.config.max_context_chars);

        if matches!(answer.outcome, AnswerOutcome::Answered(_)) {
            self.cache.put(key, answer.clone(), documents);
        }
        Ok(answer)
    }

    /// Retrieval without the generation step: the ranked chunks themselves.
    pub fn search(
        &self,
        query: &str,
        documents: &[DocumentId],
        k: usize,
        method: SearchMethod,
    ) -> Result<Vec<SearchResult>, RagError> {
        self.validate_query(query, documents, k)?;

        let mut candidates: Vec<ChunkRecord> = Vec::new();
        for &document in documents {
            match self.store.load_records(document)? {
                Some(records) => candidates.extend(records),
                None => debug!("[service] Document {} has no index, skipping", document),
            }
        }
        if candidates.is_empty() {
            warn!("[service] None of the {} selected documents are indexed", documents.len());
            return Ok(Vec::new());
        }

        let session = HybridSearcher::new(candidates, &self.embedder, &self.config)?;
        let mut results = session.search(query, k, method, &self.embedder)?;
        // Single-method strategies surface raw scorer order; only the fused
        // ranking gets the diversity pass.
        if method == SearchMethod::Hybrid && self.config.rerank_for_diversity {
            results = rerank_for_diversity(results, self.config.diversity_penalty as f32);
        }
        Ok(results)
    }

    /// Answer a question over every indexed document via the global index.
    pub fn query_all(
        &self,
        query: &str,
        k: usize,
        model: &dyn GenerativeModel,
    ) -> Result<RagAnswer, RagError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".into()));
        }
        if trimmed.chars().count() > self.config.max_query_chars {
            return Err(RagError::InvalidInput(format!(
                "query exceeds {} characters",
                self.config.max_query_chars
            )));
        }

        let Some(hits) = self.store.search_global(trimmed, k, &self.embedder)? else {
            warn!("[service] Global index not built yet");
            return Ok(RagAnswer {
                outcome: AnswerOutcome::NoContent,
                sources: Vec::new(),
            });
        };
        let results: Vec<SearchResult> = hits.into_iter().map(index_hit_to_result).collect();
        Ok(generate_answer(model, trimmed, &results, self.config.max_context_chars))
    }

    /// Rebuild the derived global index from all per-document indexes.
    pub fn rebuild_global_index(&self) -> Result<usize, RagError> {
        let total = self.store.rebuild_global(self.embedder.dim())?;
        info!("[service] Global index rebuilt with {} chunks", total);
        Ok(total)
    }

    pub fn is_document_indexed(&self, document: DocumentId) -> bool {
        self.store.contains(document)
    }

    /// Sweep expired query-cache entries. Returns the number removed.
    pub fn clear_expired_cache(&self) -> usize {
        self.cache.clear_expired()
    }

    pub fn stats(&self) -> Result<ServiceStats, RagError> {
        let (document_count, chunk_count) = self.store.stats()?;
        Ok(ServiceStats {
            document_count,
            chunk_count,
            query_cache: self.cache.stats(),
        })
    }

    fn chunker(&self) -> Result<Chunker, RagError> {
        Chunker::new(
            self.config.chunk_max_length,
            self.config.chunk_overlap,
            self.config.chunking_strategy,
        )
    }

    fn validate_query(&self, query: &str, documents: &[DocumentId], k: usize) -> Result<(), RagError> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".into()));
        }
        if query.chars().count() > self.config.max_query_chars {
            return Err(RagError::InvalidInput(format!(
                "query exceeds {} characters",
                self.config.max_query_chars
            )));
        }
        if documents.is_empty() {
            return Err(RagError::InvalidInput("at least one document must be selected".into()));
        }
        if documents.len() > self.config.max_documents_per_query {
            return Err(RagError::InvalidInput(format!(
                "at most {} documents may be queried at once",
                self.config.max_documents_per_query
            )));
        }
        if k == 0 {
            return Err(RagError::InvalidInput("result count must be positive".into()));
        }
        Ok(())
    }
}

fn index_hit_to_result(hit: IndexSearchResult) -> SearchResult {
    SearchResult {
        chunk_index: hit.chunk_index,
        document: hit.document,
        content: hit.content,
        semantic_score: hit.score,
        keyword_score: 0.0,
        hybrid_score: hit.score,
        page_number: hit.page_number,
        source_file: hit.source_file,
        metadata: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{StubEmbedder, StubModel, STUB_DIM};
    use tempfile::tempdir;

    fn service(dir: &Path) -> (RetrievalService, Arc<StubEmbedder>) {
        let embedder = Arc::new(StubEmbedder::new());
        let config = RagConfig {
            embedding_dim: STUB_DIM,
            chunk_max_length: 20,
            chunk_overlap: 5,
            ..RagConfig::default()
        };
        let service = RetrievalService::new(embedder.clone(), dir, config).unwrap();
        (service, embedder)
    }

    const DOC_ONE: &str = "The mitochondria is the powerhouse of the cell. It produces energy \
                           through respiration. Cells rely on this energy for every function \
                           they perform during their lifetime in the body.";
    const DOC_TWO: &str = "Rust guarantees memory safety without garbage collection. The borrow \
                           checker enforces ownership rules at compile time so data races are \
                           impossible in safe code written by anyone.";

    #[test]
    fn test_process_and_query_end_to_end() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());

        let count = service.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();
        assert!(count > 0);

        let answer = service
            .query("what produces energy in the cell?", &[DocumentId(1)], 3, SearchMethod::Hybrid, &StubModel::answering())
            .unwrap();
        assert!(matches!(answer.outcome, AnswerOutcome::Answered(_)));
        assert!(!answer.sources.is_empty());
        assert_eq!(answer.sources[0].source_file, "bio.pdf");
    }

    #[test]
    fn test_second_identical_query_hits_cache() {
        let dir = tempdir().unwrap();
        let (service, embedder) = service(dir.path());
        service.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();

        service
            .query("cell energy", &[DocumentId(1)], 3, SearchMethod::Hybrid, &StubModel::answering())
            .unwrap();
        let calls_after_first = embedder.calls();
        service
            .query("cell energy", &[DocumentId(1)], 3, SearchMethod::Hybrid, &StubModel::answering())
            .unwrap();
        assert_eq!(service.stats().unwrap().query_cache.total_hits, 1);
        // The cached answer was served without touching the embedder again.
        assert_eq!(embedder.calls(), calls_after_first);
    }

    #[test]
    fn test_embedder_failure_is_a_hard_error() {
        let dir = tempdir().unwrap();
        let (healthy, _) = service(dir.path());
        healthy.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();

        let config = RagConfig {
            embedding_dim: STUB_DIM,
            ..RagConfig::default()
        };
        let broken = RetrievalService::new(
            Arc::new(crate::test_util::FailingEmbedder),
            dir.path(),
            config,
        )
        .unwrap();

        let err = broken
            .process_document(DocumentId(2), "new.pdf", DOC_TWO)
            .unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));

        let err = broken
            .query("cell energy", &[DocumentId(1)], 3, SearchMethod::Hybrid, &StubModel::answering())
            .unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }

    #[test]
    fn test_reprocessing_invalidates_cached_answers() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        service.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();

        service
            .query("cell energy", &[DocumentId(1)], 3, SearchMethod::Hybrid, &StubModel::answering())
            .unwrap();
        assert_eq!(service.stats().unwrap().query_cache.total_entries, 1);

        service.process_document(DocumentId(1), "bio.pdf", DOC_TWO).unwrap();
        assert_eq!(service.stats().unwrap().query_cache.total_entries, 0);
    }

    #[test]
    fn test_delete_invalidates_and_removes() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        service.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();
        service
            .query("cell energy", &[DocumentId(1)], 3, SearchMethod::Hybrid, &StubModel::answering())
            .unwrap();

        service.delete_document(DocumentId(1)).unwrap();
        assert!(!service.is_document_indexed(DocumentId(1)));
        assert_eq!(service.stats().unwrap().query_cache.total_entries, 0);
    }

    #[test]
    fn test_unindexed_document_in_selection_is_skipped() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        service.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();

        let results = service
            .search("cell energy", &[DocumentId(1), DocumentId(99)], 3, SearchMethod::Hybrid)
            .unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.document == DocumentId(1)));
    }

    #[test]
    fn test_no_indexed_documents_gives_no_content() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        let answer = service
            .query("anything", &[DocumentId(42)], 3, SearchMethod::Hybrid, &StubModel::answering())
            .unwrap();
        assert!(matches!(answer.outcome, AnswerOutcome::NoContent));
    }

    #[test]
    fn test_validation_rejections() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        let model = StubModel::answering();

        assert!(service.query("  ", &[DocumentId(1)], 3, SearchMethod::Hybrid, &model).is_err());
        assert!(service.query("q", &[], 3, SearchMethod::Hybrid, &model).is_err());
        assert!(service.query("q", &[DocumentId(1)], 0, SearchMethod::Hybrid, &model).is_err());

        let too_many: Vec<DocumentId> = (0..100).map(DocumentId).collect();
        assert!(service.query("q", &too_many, 3, SearchMethod::Hybrid, &model).is_err());

        let long_query = "q".repeat(5000);
        assert!(service.query(&long_query, &[DocumentId(1)], 3, SearchMethod::Hybrid, &model).is_err());
    }

    #[test]
    fn test_generation_failure_keeps_sources_and_is_not_cached() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        service.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();

        let answer = service
            .query("cell energy", &[DocumentId(1)], 3, SearchMethod::Hybrid, &StubModel::failing())
            .unwrap();
        assert!(matches!(answer.outcome, AnswerOutcome::GenerationFailed(_)));
        assert!(!answer.sources.is_empty());
        assert_eq!(service.stats().unwrap().query_cache.total_entries, 0);
    }

    #[test]
    fn test_method_is_part_of_the_cache_key() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        service.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();

        let model = StubModel::answering();
        service.query("cell energy", &[DocumentId(1)], 3, SearchMethod::Hybrid, &model).unwrap();
        service.query("cell energy", &[DocumentId(1)], 3, SearchMethod::Keyword, &model).unwrap();
        assert_eq!(service.stats().unwrap().query_cache.total_entries, 2);
    }

    #[test]
    fn test_global_rebuild_and_query_all() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        service.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();
        service.process_document(DocumentId(2), "rust.pdf", DOC_TWO).unwrap();

        let total = service.rebuild_global_index().unwrap();
        assert!(total >= 2);

        let answer = service
            .query_all("borrow checker ownership", 3, &StubModel::answering())
            .unwrap();
        assert!(matches!(answer.outcome, AnswerOutcome::Answered(_)));
        assert!(answer.sources.iter().any(|s| s.source_file == "rust.pdf"));
    }

    #[test]
    fn test_query_all_without_global_index() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        let answer = service.query_all("anything", 3, &StubModel::answering()).unwrap();
        assert!(matches!(answer.outcome, AnswerOutcome::NoContent));
    }

    #[test]
    fn test_stats_counts() {
        let dir = tempdir().unwrap();
        let (service, _) = service(dir.path());
        service.process_document(DocumentId(1), "bio.pdf", DOC_ONE).unwrap();
        service.process_document(DocumentId(2), "rust.pdf", DOC_TWO).unwrap();

        let stats = service.stats().unwrap();
        assert_eq!(stats.document_count, 2);
        assert!(stats.chunk_count >= 2);
    }
}
