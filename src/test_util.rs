// Shared test doubles: a deterministic bag-of-words embedder and a canned
// generative model. Test-only module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::answer::GenerativeModel;
use crate::chunker::{Chunk, ChunkStrategy};
use crate::embedding::Embedder;
use crate::error::RagError;
use crate::DocumentId;

/// Hand-built chunks for store and search tests.
pub fn make_chunks(document: DocumentId, texts: &[&str]) -> Vec<Chunk> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Chunk {
            content: text.to_string(),
            chunk_id: i,
            word_count: text.split_whitespace().count(),
            char_count: text.chars().count(),
            page_number: None,
            document,
            strategy: ChunkStrategy::Word,
            metadata: HashMap::new(),
        })
        .collect()
}

pub const STUB_DIM: usize = 32;

/// Deterministic embedder: each lowercased token increments one of
/// `STUB_DIM` buckets chosen by an FNV-1a hash. Texts sharing words get
/// similar vectors; identical text always gets the identical vector.
pub struct StubEmbedder {
    calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self { calls: AtomicUsize::new(0) }
    }

    /// Number of `embed` invocations, for cache assertions.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; STUB_DIM];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            vector[(hash % STUB_DIM as u64) as usize] += 1.0;
        }
        vector
    }
}

impl Embedder for StubEmbedder {
    fn dim(&self) -> usize {
        STUB_DIM
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
    }
}

/// Embedder that always fails, for hard-failure propagation tests.
pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn dim(&self) -> usize {
        STUB_DIM
    }

    fn embed(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>, RagError> {
        Err(RagError::Embedding("stub provider down".into()))
    }
}

/// Generative model double: echoes a fixed answer, or fails on demand.
pub struct StubModel {
    pub fail: bool,
}

impl StubModel {
    pub fn answering() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl GenerativeModel for StubModel {
    fn complete(&self, prompt: &str) -> Result<String, RagError> {
        if self.fail {
            return Err(RagError::Generation("stub model down".into()));
        }
        Ok(format!("stub answer ({} prompt chars)", prompt.chars().count()))
    }
}
