// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! Retrieval core for a document question-answering service.
//!
//! Uploaded documents are chunked, embedded and indexed per document; queries
//! run hybrid (BM25 + semantic) search over the candidate set, re-rank for
//! source diversity, and hand the top chunks to an external generative model.
//! The web layer, auth, PDF parsing and the model call itself live outside
//! this crate.

use serde::{Deserialize, Serialize};

pub mod answer;
pub mod bm25;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod flat_index;
pub mod hybrid;
pub mod index_store;
pub mod query_cache;
pub mod semantic;
pub mod service;

#[cfg(test)]
pub(crate) mod test_util;

pub use answer::{AnswerOutcome, GenerativeModel, RagAnswer, SourceRef};
pub use chunker::{Chunk, ChunkStrategy, Chunker, PageText};
pub use config::RagConfig;
pub use embedding::{CachedEmbedder, Embedder};
pub use error::RagError;
pub use hybrid::{SearchMethod, SearchResult};
pub use service::RetrievalService;

/// Opaque document identifier assigned once at upload time. The sole index
/// key; filenames are display metadata only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub u64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
