// Copyright 2025 docrag contributors
// SPDX-License-Identifier: MIT
//
//! Durable per-document index storage plus the derived global index.
//!
//! Each processed document owns two co-located blobs under its id: a flat
//! vector index and a metadata sidecar. Sidecar order equals vector row
//! order; that positional correspondence is load-bearing. A (re)build is a
//! full replace via write-to-temp-then-rename, never an in-place append.
//! The global index is a derived aggregate, rebuilt on demand and never
//! authoritative.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::chunker::Chunk;
use crate::embedding::{embed_normalized, normalize_l2, Embedder};
use crate::error::RagError;
use crate::flat_index::FlatIndex;
use crate::DocumentId;

/// Fixed-schema per-chunk metadata record persisted in the sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub content: String,
    pub document_id: DocumentId,
    /// Display name only; never used as an index key.
    pub source_file: String,
    pub chunk_index: usize,
    pub word_count: usize,
    pub char_count: usize,
    pub page_number: Option<u32>,
    pub strategy: String,
    /// Document-type specific extracted fields, carried through unchanged.
    pub extra: HashMap<String, serde_json::Value>,
}

impl ChunkRecord {
    pub fn from_chunk(chunk: &Chunk, source_file: &str) -> Self {
        Self {
            content: chunk.content.clone(),
            document_id: chunk.document,
            source_file: source_file.to_string(),
            chunk_index: chunk.chunk_id,
            word_count: chunk.word_count,
            char_count: chunk.char_count,
            page_number: chunk.page_number,
            strategy: chunk.strategy.as_str().to_string(),
            extra: chunk.metadata.clone(),
        }
    }

    /// Promote a legacy plain-string sidecar entry to the fixed schema with
    /// synthesized fields.
    fn from_legacy(content: String, document_id: DocumentId, source_file: &str, position: usize) -> Self {
        let word_count = content.split_whitespace().count();
        let char_count = content.chars().count();
        Self {
            content,
            document_id,
            source_file: source_file.to_string(),
            chunk_index: position,
            word_count,
            char_count,
            page_number: None,
            strategy: "word".to_string(),
            extra: HashMap::new(),
        }
    }
}

/// Sidecar entry as persisted. Older deployments stored bare chunk text.
#[derive(Debug, Serialize, Deserialize)]
enum MetaEntry {
    Legacy(String),
    Record(ChunkRecord),
}

/// A hit from a stored-index search.
#[derive(Debug, Clone)]
pub struct IndexSearchResult {
    pub content: String,
    pub score: f32,
    pub document: DocumentId,
    pub chunk_index: usize,
    pub page_number: Option<u32>,
    pub source_file: String,
}

/// File-backed store holding one index slot per document id plus one slot
/// for the merged global index.
pub struct DocumentIndexStore {
    root: PathBuf,
    similarity_threshold: f32,
    // Per-document write/read exclusion so a reprocessing upload and a
    // concurrent search never interleave partial state.
    locks: Mutex<HashMap<DocumentId, Arc<Mutex<()>>>>,
    global_lock: Mutex<()>,
}

impl DocumentIndexStore {
    pub fn new(root: impl Into<PathBuf>, similarity_threshold: f32) -> Result<Self, RagError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            similarity_threshold,
            locks: Mutex::new(HashMap::new()),
            global_lock: Mutex::new(()),
        })
    }

    fn index_path(&self, document: DocumentId) -> PathBuf {
        self.root.join(format!("doc-{}.index", document))
    }

    fn meta_path(&self, document: DocumentId) -> PathBuf {
        self.root.join(format!("doc-{}.meta", document))
    }

    fn global_index_path(&self) -> PathBuf {
        self.root.join("global.index")
    }

    fn global_meta_path(&self) -> PathBuf {
        self.root.join("global.meta")
    }

    fn document_lock(&self, document: DocumentId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(document).or_default().clone()
    }

    /// Build (or fully replace) a document's index from its chunks.
    ///
    /// Embeds every chunk in one batch, L2-normalizes, writes the vector
    /// index and the parallel sidecar atomically. Returns the number of
    /// chunks indexed; an empty chunk list is a warning, not an error.
    pub fn build(
        &self,
        document: DocumentId,
        source_file: &str,
        chunks: &[Chunk],
        embedder: &dyn Embedder,
    ) -> Result<usize, RagError> {
        if chunks.is_empty() {
            warn!("[index_store] Document {} produced no chunks, nothing indexed", document);
            return Ok(0);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let vectors = embed_normalized(embedder, &texts)?;
        if vectors.len() != chunks.len() {
            return Err(RagError::Internal(format!(
                "embedded {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let mut index = FlatIndex::new(embedder.dim())?;
        let mut entries = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(&vectors) {
            index.add(vector)?;
            entries.push(MetaEntry::Record(ChunkRecord::from_chunk(chunk, source_file)));
        }

        let lock = self.document_lock(document);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write_pair(&self.index_path(document), &self.meta_path(document), &index, &entries)?;
        info!("[index_store] Indexed {} chunks for document {}", chunks.len(), document);
        Ok(chunks.len())
    }

    /// Search the stored indexes of the listed documents.
    ///
    /// Embeds the query once, searches each document index independently,
    /// filters by the minimum similarity threshold, merges and returns the
    /// top `k` overall. Missing or corrupt document indexes are skipped,
    /// never abort the search.
    pub fn search(
        &self,
        query: &str,
        document_ids: &[DocumentId],
        k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<IndexSearchResult>, RagError> {
        let mut query_vector = embedder.embed_one(query)?;
        normalize_l2(&mut query_vector);

        let mut merged = Vec::new();
        for &document in document_ids {
            match self.load_pair(document) {
                Ok(Some((index, records))) => {
                    let per_doc_k = usize::min(k, index.len());
                    let hits = index.search(&query_vector, per_doc_k)?;
                    for (row, score) in hits {
                        if score <= self.similarity_threshold {
                            continue;
                        }
                        let record = &records[row];
                        merged.push(IndexSearchResult {
                            content: record.content.clone(),
                            score,
                            document,
                            chunk_index: record.chunk_index,
                            page_number: record.page_number,
                            source_file: record.source_file.clone(),
                        });
                    }
                }
                Ok(None) => {
                    debug!("[index_store] Document {} has no index, skipping", document);
                }
                Err(e) => {
                    error!("[index_store] Skipping unreadable index for document {}: {}", document, e);
                }
            }
        }

        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(k);
        Ok(merged)
    }

    /// Load a document's sidecar records. `Ok(None)` when the document has
    /// no persisted index.
    pub fn load_records(&self, document: DocumentId) -> Result<Option<Vec<ChunkRecord>>, RagError> {
        Ok(self.load_pair(document)?.map(|(_, records)| records))
    }

    pub fn contains(&self, document: DocumentId) -> bool {
        self.index_path(document).exists() && self.meta_path(document).exists()
    }

    /// Delete a document's index slot. Deleting an absent slot is a no-op.
    pub fn delete(&self, document: DocumentId) -> Result<(), RagError> {
        let lock = self.document_lock(document);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        for path in [self.index_path(document), self.meta_path(document)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("[index_store] Deleted index for document {}", document);
        Ok(())
    }

    /// All document ids with a persisted index, in ascending id order (fixed
    /// scan order keeps the global rebuild reproducible).
    pub fn list_documents(&self) -> Result<Vec<DocumentId>, RagError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_prefix("doc-").and_then(|n| n.strip_suffix(".index")) {
                if let Ok(id) = id.parse::<u64>() {
                    ids.push(DocumentId(id));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Rebuild the merged global index from every per-document index.
    ///
    /// Re-extracts stored vectors, concatenates vectors and normalized
    /// metadata in scan order, and fully overwrites the global slot. With no
    /// per-document indexes present this returns 0 and leaves any prior
    /// global index untouched. Idempotent.
    pub fn rebuild_global(&self, embedding_dim: usize) -> Result<usize, RagError> {
        let _guard = self.global_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut global = FlatIndex::new(embedding_dim)?;
        let mut entries: Vec<MetaEntry> = Vec::new();
        let mut document_count = 0usize;

        for document in self.list_documents()? {
            match self.load_pair(document) {
                Ok(Some((index, records))) => {
                    if index.dim() != embedding_dim {
                        warn!(
                            "[index_store] Document {} has dimensionality {} (expected {}), skipping in global rebuild",
                            document,
                            index.dim(),
                            embedding_dim
                        );
                        continue;
                    }
                    for (row, record) in records.into_iter().enumerate() {
                        // Rows and records stay paired; the loader already
                        // verified the counts match.
                        if let Some(vector) = index.reconstruct(row) {
                            global.add(vector)?;
                            entries.push(MetaEntry::Record(record));
                        }
                    }
                    document_count += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("[index_store] Skipping document {} in global rebuild: {}", document, e);
                }
            }
        }

        if entries.is_empty() {
            info!("[index_store] No per-document indexes found, global index left untouched");
            return Ok(0);
        }

        let total = entries.len();
        self.write_pair(&self.global_index_path(), &self.global_meta_path(), &global, &entries)?;
        info!(
            "[index_store] Rebuilt global index: {} chunks from {} documents",
            total, document_count
        );
        Ok(total)
    }

    /// Search the merged global index. `Ok(None)` when no global index has
    /// been built yet.
    pub fn search_global(
        &self,
        query: &str,
        k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Option<Vec<IndexSearchResult>>, RagError> {
        let loaded = {
            let _guard = self.global_lock.lock().unwrap_or_else(|e| e.into_inner());
            self.load_pair_at(
                &self.global_index_path(),
                &self.global_meta_path(),
                DocumentId(0),
                "global",
            )?
        };
        let Some((index, records)) = loaded else {
            return Ok(None);
        };

        let mut query_vector = embedder.embed_one(query)?;
        normalize_l2(&mut query_vector);

        let hits = index.search(&query_vector, usize::min(k, index.len()))?;
        let results = hits
            .into_iter()
            .filter(|(_, score)| *score > self.similarity_threshold)
            .map(|(row, score)| {
                let record = &records[row];
                IndexSearchResult {
                    content: record.content.clone(),
                    score,
                    document: record.document_id,
                    chunk_index: record.chunk_index,
                    page_number: record.page_number,
                    source_file: record.source_file.clone(),
                }
            })
            .collect();
        Ok(Some(results))
    }

    /// Document and chunk counts across all per-document indexes.
    pub fn stats(&self) -> Result<(usize, usize), RagError> {
        let documents = self.list_documents()?;
        let mut chunks = 0usize;
        for &document in &documents {
            if let Ok(Some(records)) = self.load_records(document) {
                chunks += records.len();
            }
        }
        Ok((documents.len(), chunks))
    }

    fn load_pair(&self, document: DocumentId) -> Result<Option<(FlatIndex, Vec<ChunkRecord>)>, RagError> {
        let lock = self.document_lock(document);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        self.load_pair_at(
            &self.index_path(document),
            &self.meta_path(document),
            document,
            &format!("doc-{}", document),
        )
    }

    fn load_pair_at(
        &self,
        index_path: &Path,
        meta_path: &Path,
        document: DocumentId,
        key: &str,
    ) -> Result<Option<(FlatIndex, Vec<ChunkRecord>)>, RagError> {
        if !index_path.exists() || !meta_path.exists() {
            return Ok(None);
        }
        let index = FlatIndex::from_bytes(&fs::read(index_path)?)?;
        // The sidecar is JSON, not bincode: the open-ended `extra` values
        // need a self-describing format to decode.
        let entries: Vec<MetaEntry> = serde_json::from_slice(&fs::read(meta_path)?)
            .map_err(|e| RagError::CorruptIndex(format!("sidecar decode failed for {}: {}", key, e)))?;
        if entries.len() != index.len() {
            return Err(RagError::CorruptIndex(format!(
                "sidecar for {} holds {} records but index holds {} vectors",
                key,
                entries.len(),
                index.len()
            )));
        }
        let records = entries
            .into_iter()
            .enumerate()
            .map(|(position, entry)| match entry {
                MetaEntry::Record(record) => record,
                MetaEntry::Legacy(content) => {
                    // Legacy sidecars predate display filenames; synthesize a
                    // readable one rather than leaking the slot key.
                    let display = format!("document {}", document);
                    ChunkRecord::from_legacy(content, document, &display, position)
                }
            })
            .collect();
        Ok(Some((index, records)))
    }

    /// Write both blobs next to their targets, then rename into place so a
    /// reader observes either the fully-old or fully-new pair.
    fn write_pair(
        &self,
        index_path: &Path,
        meta_path: &Path,
        index: &FlatIndex,
        entries: &[MetaEntry],
    ) -> Result<(), RagError> {
        let meta_bytes = serde_json::to_vec(entries)
            .map_err(|e| RagError::Internal(format!("sidecar encode failed: {}", e)))?;
        let index_tmp = index_path.with_extension("index.tmp");
        let meta_tmp = meta_path.with_extension("meta.tmp");
        fs::write(&index_tmp, index.to_bytes()?)?;
        fs::write(&meta_tmp, meta_bytes)?;
        fs::rename(&index_tmp, index_path)?;
        fs::rename(&meta_tmp, meta_path)?;
        Ok(())
    }
}
