// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! Session-scoped semantic scorer over one query's candidate chunks.
//!
//! Embeds the candidates into an in-memory flat index, scores the query by
//! inner product over L2-normalized vectors, and is dropped with the
//! session. The persisted per-document indexes are not consulted here; the
//! hybrid layer hands over candidate texts it already loaded.

use log::debug;

use crate::embedding::{embed_normalized, normalize_l2, Embedder};
use crate::error::RagError;
use crate::flat_index::FlatIndex;

pub struct SemanticSearcher {
    index: FlatIndex,
}

impl SemanticSearcher {
    /// Embed and index the candidate texts, preserving their order.
    pub fn build(texts: &[&str], embedder: &dyn Embedder) -> Result<Self, RagError> {
        if texts.is_empty() {
            return Err(RagError::InvalidInput("semantic searcher needs at least one chunk".into()));
        }
        let vectors = embed_normalized(embedder, texts)?;
        let mut index = FlatIndex::new(embedder.dim())?;
        for vector in &vectors {
            index.add(vector)?;
        }
        debug!("[semantic] Indexed {} candidate chunks", texts.len());
        Ok(Self { index })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Cosine scores for `query` against every candidate, `(position, score)`
    /// pairs sorted descending, truncated to `top_k`.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<(usize, f32)>, RagError> {
        let mut query_vector = embedder.embed_one(query)?;
        normalize_l2(&mut query_vector);
        self.index.search(&query_vector, top_k)
    }
}
