// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! Exact (brute-force) inner-product vector index.
//!
//! Rows are stored densely in insertion order; row `i` corresponds to
//! metadata record `i` in the owning store. With L2-normalized vectors the
//! inner product is cosine similarity. Exactness is prioritized over scale
//! here; there is no approximate structure.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::error::RagError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    // Row-major, len = dim * rows.
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dim: usize) -> Result<Self, RagError> {
        if dim == 0 {
            return Err(RagError::InvalidInput("index dimensionality must be positive".into()));
        }
        Ok(Self { dim, vectors: Vec::new() })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len() / self.dim
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Append a vector as the next row.
    pub fn add(&mut self, vector: &[f32]) -> Result<(), RagError> {
        if vector.len() != self.dim {
            return Err(RagError::Internal(format!(
                "vector length {} does not match index dimensionality {}",
                vector.len(),
                self.dim
            )));
        }
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    /// Row `i` as stored. Used by the global rebuild to re-extract vectors.
    pub fn reconstruct(&self, row: usize) -> Option<&[f32]> {
        let start = row.checked_mul(self.dim)?;
        self.vectors.get(start..start + self.dim)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.vectors.chunks_exact(self.dim)
    }

    /// Top-`k` rows by inner product with `query`, descending. Ties keep row
    /// order (stable sort).
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(usize, f32)>, RagError> {
        if query.len() != self.dim {
            return Err(RagError::InvalidInput(format!(
                "query length {} does not match index dimensionality {}",
                query.len(),
                self.dim
            )));
        }
        let query = ArrayView1::from(query);
        let mut scored: Vec<(usize, f32)> = self
            .rows()
            .enumerate()
            .map(|(row, vector)| (row, query.dot(&ArrayView1::from(vector))))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RagError> {
        bincode::serialize(self).map_err(|e| RagError::Internal(format!("index encode failed: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RagError> {
        let index: FlatIndex = bincode::deserialize(bytes)
            .map_err(|e| RagError::CorruptIndex(format!("index decode failed: {}", e)))?;
        if index.dim == 0 || index.vectors.len() % index.dim != 0 {
            return Err(RagError::CorruptIndex("index blob has inconsistent shape".into()));
        }
        Ok(index)
    }
}
