// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! Embedding provider seam and the text-keyed embedding cache.
//!
//! The core treats the sentence embedding model as a frozen black box behind
//! the [`Embedder`] trait: text in, fixed-dimension vector out, deterministic
//! for identical input. An optional `fastembed`-backed provider lives behind
//! the `fastembed` cargo feature.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::RagError;

/// Fixed-dimension sentence embedding provider.
///
/// Implementations must be deterministic for identical input text and return
/// one vector of `dim()` floats per input.
pub trait Embedder: Send + Sync {
    /// Embedding dimensionality, constant for the provider's lifetime.
    fn dim(&self) -> usize;

    /// Embed a batch of texts. One vector per input, in input order.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError>;

    /// Embed a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let mut vectors = self.embed(&[text])?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("provider returned no vector".into()))
    }
}

impl<E: Embedder + ?Sized> Embedder for std::sync::Arc<E> {
    fn dim(&self) -> usize {
        (**self).dim()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        (**self).embed(texts)
    }
}

/// L2-normalize a vector in place so inner product equals cosine similarity.
/// Zero vectors are left untouched.
pub fn normalize_l2(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

struct CacheSlot {
    vector: Vec<f32>,
    stored_at: Instant,
}

/// Bounded in-memory embedding cache keyed by exact input text
/// (case-sensitive, unnormalized). Oldest-entry eviction under capacity
/// pressure, per-entry TTL.
pub struct EmbeddingCache {
    entries: Mutex<HashMap<String, CacheSlot>>,
    max_size: usize,
    ttl: Duration,
}

impl EmbeddingCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size,
            ttl,
        }
    }

    /// Look up a cached vector. Expired entries are treated as absent and
    /// evicted opportunistically.
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => return None, // poisoned lock degrades to a miss
        };
        match entries.get(text) {
            Some(slot) if slot.stored_at.elapsed() < self.ttl => Some(slot.vector.clone()),
            Some(_) => {
                entries.remove(text);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, text: &str, vector: Vec<f32>) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if entries.len() >= self.max_size && !entries.contains_key(text) {
            // Evict the oldest entry.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, slot)| slot.stored_at)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(text.to_string(), CacheSlot { vector, stored_at: Instant::now() });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}

/// Wraps an [`Embedder`] with an [`EmbeddingCache`]. A cache miss always
/// falls through to live computation; cache trouble never fails the caller.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: EmbeddingCache,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, max_size: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: EmbeddingCache::new(max_size, ttl),
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

impl<E: Embedder> Embedder for CachedEmbedder<E> {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut uncached: Vec<&str> = Vec::new();
        let mut uncached_positions: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(text) {
                Some(vector) => vectors.push(Some(vector)),
                None => {
                    vectors.push(None);
                    uncached.push(*text);
                    uncached_positions.push(i);
                }
            }
        }

        if !uncached.is_empty() {
            debug!("[embedding] Computing {} uncached of {} texts", uncached.len(), texts.len());
            let fresh = self.inner.embed(&uncached)?;
            if fresh.len() != uncached.len() {
                warn!(
                    "[embedding] Provider returned {} vectors for {} texts",
                    fresh.len(),
                    uncached.len()
                );
                return Err(RagError::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    fresh.len(),
                    uncached.len()
                )));
            }
            for (position, vector) in uncached_positions.iter().zip(fresh) {
                self.cache.put(texts[*position], vector.clone());
                vectors[*position] = Some(vector);
            }
        }

        Ok(vectors.into_iter().flatten().collect())
    }
}

/// Embed and L2-normalize a batch in one step.
pub fn embed_normalized(embedder: &dyn Embedder, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
    let mut vectors = embedder.embed(texts)?;
    for vector in &mut vectors {
        normalize_l2(vector);
    }
    Ok(vectors)
}

#[cfg(feature = "fastembed")]
pub use self::minilm::MiniLmEmbedder;

#[cfg(feature = "fastembed")]
mod minilm {
    use super::Embedder;
    use crate::error::RagError;
    use std::sync::Arc;

    /// Local MiniLM embedding provider (384 dimensions) via `fastembed`.
    pub struct MiniLmEmbedder {
        model: Arc<fastembed::TextEmbedding>,
    }

    impl MiniLmEmbedder {
        /// Load the model, storing downloaded files under `cache_dir`.
        pub fn new(cache_dir: &std::path::Path) -> Result<Self, RagError> {
            let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2)
                .with_cache_dir(cache_dir.to_path_buf());
            let model = fastembed::TextEmbedding::try_new(options)
                .map_err(|e| RagError::Embedding(e.to_string()))?;
            Ok(Self { model: Arc::new(model) })
        }
    }

    impl Embedder for MiniLmEmbedder {
        fn dim(&self) -> usize {
            384
        }

        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
            let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
            self.model
                .embed(owned, None)
                .map_err(|e| RagError::Embedding(e.to_string()))
        }
    }
}
