// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! TTL query-answer cache with document-set invalidation.
//!
//! Keys hash the normalized query, the sorted candidate document ids and the
//! result count, so the same question over a different document selection
//! never collides. Every entry remembers the document ids it was computed
//! from; invalidation removes exactly the entries whose set intersects the
//! changed documents. The cache is an optimization only and never fails the
//! caller: internal trouble degrades to a miss or a no-op.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::DocumentId;

struct Entry<V> {
    value: V,
    documents: HashSet<DocumentId>,
    stored_at: Instant,
    expires_at: Instant,
    hit_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub active_entries: usize,
    pub expired_entries: usize,
    pub total_hits: u64,
}

/// Bounded TTL cache for completed query answers.
pub struct QueryCache<V> {
    entries: std::sync::Mutex<HashMap<String, Entry<V>>>,
    ttl: Duration,
    max_size: usize,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: std::sync::Mutex::new(HashMap::new()),
            ttl,
            max_size,
        }
    }

    /// Deterministic cache key: sha256 over the trimmed lowercased query, the
    /// sorted document ids and `k`. Selection order does not matter.
    pub fn key(query: &str, documents: &[DocumentId], k: usize) -> String {
        let mut sorted: Vec<u64> = documents.iter().map(|d| d.0).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut hasher = Sha256::new();
        hasher.update(query.trim().to_lowercase().as_bytes());
        hasher.update(b"\x1f");
        for id in &sorted {
            hasher.update(id.to_le_bytes());
        }
        hasher.update(b"\x1f");
        hasher.update((k as u64).to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a cached answer. Expired entries are evicted and treated as
    /// absent.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("[query_cache] Lock poisoned, treating lookup as a miss");
                return None;
            }
        };
        match entries.get_mut(key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                entry.hit_count += 1;
                debug!("[query_cache] Hit ({} total) for {}", entry.hit_count, key.get(..12).unwrap_or(key));
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store an answer with the document set it was computed from.
    pub fn put(&self, key: String, value: V, documents: &[DocumentId]) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("[query_cache] Lock poisoned, dropping cache write");
                return;
            }
        };
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            // Evict the oldest entry to stay bounded.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }
        let now = Instant::now();
        entries.insert(
            key,
            Entry {
                value,
                documents: documents.iter().copied().collect(),
                stored_at: now,
                expires_at: now + self.ttl,
                hit_count: 0,
            },
        );
    }

    /// Drop every entry whose document set intersects `documents`. Returns
    /// the number of entries removed.
    pub fn invalidate(&self, documents: &[DocumentId]) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("[query_cache] Lock poisoned, skipping invalidation");
                return 0;
            }
        };
        let before = entries.len();
        entries.retain(|_, entry| !documents.iter().any(|d| entry.documents.contains(d)));
        let removed = before - entries.len();
        if removed > 0 {
            debug!("[query_cache] Invalidated {} entries for {} documents", removed, documents.len());
        }
        removed
    }

    /// Sweep expired entries. Returns the number removed.
    pub fn clear_expired(&self) -> usize {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => return 0,
        };
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(_) => {
                return CacheStats {
                    total_entries: 0,
                    active_entries: 0,
                    expired_entries: 0,
                    total_hits: 0,
                }
            }
        };
        let now = Instant::now();
        let expired = entries.values().filter(|e| now >= e.expires_at).count();
        CacheStats {
            total_entries: entries.len(),
            active_entries: entries.len() - expired,
            expired_entries: expired,
            total_hits: entries.values().map(|e| e.hit_count).sum(),
        }
    }
}
