// src/chunker.rs
//
// Splits extracted document text into overlapping chunks. Three strategies:
// word windows, sentence accumulation, paragraph accumulation. Chunk
// boundaries never cut inside the active strategy's unit.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RagError;
use crate::DocumentId;

/// Emitted when a document yields no usable text, so the indexing stage never
/// sees an empty chunk list or embeds an empty string.
pub const PLACEHOLDER_CONTENT: &str = "[no extractable text]";

/// Normalized text under this many characters triggers the placeholder guard.
const MIN_TEXT_CHARS: usize = 10;

static DEHYPHENATE: Lazy<Regex> = Lazy::new(|| {
    // Rejoin words split by a hyphen at a line break in extracted PDF text.
    Regex::new(r"(\p{L})-\s*\n\s*(\p{L})").unwrap()
});

static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x00-\x08\x0b\x0c\x0e-\x1f]").unwrap());

/// Chunking strategy selecting the unit that boundaries must respect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    Word,
    Sentence,
    Paragraph,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Word => "word",
            ChunkStrategy::Sentence => "sentence",
            ChunkStrategy::Paragraph => "paragraph",
        }
    }

    pub fn parse(s: &str) -> Result<Self, RagError> {
        match s {
            "word" => Ok(ChunkStrategy::Word),
            "sentence" => Ok(ChunkStrategy::Sentence),
            "paragraph" => Ok(ChunkStrategy::Paragraph),
            other => Err(RagError::InvalidInput(format!(
                "unknown chunking strategy '{}' (expected word, sentence or paragraph)",
                other
            ))),
        }
    }
}

/// A contiguous span of document text, the atomic retrieval unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// The chunk text.
    pub content: String,
    /// Sequence position within the owning document.
    pub chunk_id: usize,
    pub word_count: usize,
    pub char_count: usize,
    /// Set by the page-attributed variant; chunks never span a page boundary.
    pub page_number: Option<u32>,
    pub document: DocumentId,
    pub strategy: ChunkStrategy,
    /// Document-type specific extracted fields, carried through unchanged.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Chunk {
    fn new(
        content: String,
        chunk_id: usize,
        page_number: Option<u32>,
        document: DocumentId,
        strategy: ChunkStrategy,
    ) -> Self {
        let word_count = content.split_whitespace().count();
        let char_count = content.chars().count();
        Self {
            content,
            chunk_id,
            word_count,
            char_count,
            page_number,
            document,
            strategy,
            metadata: HashMap::new(),
        }
    }
}

/// One page of extracted text, as handed over by the PDF extraction
/// collaborator.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page_number: u32,
    pub content: String,
}

/// Normalize extracted text: rejoin hyphenated line breaks, strip control
/// characters, collapse whitespace runs.
pub fn normalize_text(text: &str) -> String {
    let dehyphenated = DEHYPHENATE.replace_all(text, "$1$2");
    let cleaned = CONTROL_CHARS.replace_all(&dehyphenated, " ");
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic text chunker. Same input and parameters always produce the
/// same boundaries.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_length: usize,
    overlap: usize,
    strategy: ChunkStrategy,
}

impl Chunker {
    /// Create a chunker. `max_length` and `overlap` are counted in words for
    /// every strategy.
    pub fn new(max_length: usize, overlap: usize, strategy: ChunkStrategy) -> Result<Self, RagError> {
        if max_length == 0 {
            return Err(RagError::InvalidInput("chunk max_length must be positive".into()));
        }
        if overlap >= max_length {
            return Err(RagError::InvalidInput(format!(
                "chunk overlap ({}) must be smaller than max_length ({})",
                overlap, max_length
            )));
        }
        Ok(Self { max_length, overlap, strategy })
    }

    /// Split a single text blob into chunks.
    pub fn chunk(&self, document: DocumentId, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        self.chunk_into(document, text, None, &mut chunks);
        if chunks.is_empty() {
            chunks.push(Chunk::new(
                PLACEHOLDER_CONTENT.to_string(),
                0,
                None,
                document,
                self.strategy,
            ));
        }
        chunks
    }

    /// Page-attributed variant: chunk each page independently and stamp every
    /// resulting chunk with that page's number. Chunk ids keep counting
    /// across pages.
    pub fn chunk_pages(&self, document: DocumentId, pages: &[PageText]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for page in pages {
            self.chunk_into(document, &page.content, Some(page.page_number), &mut chunks);
        }
        if chunks.is_empty() {
            chunks.push(Chunk::new(
                PLACEHOLDER_CONTENT.to_string(),
                0,
                pages.first().map(|p| p.page_number),
                document,
                self.strategy,
            ));
        }
        chunks
    }

    fn chunk_into(
        &self,
        document: DocumentId,
        text: &str,
        page_number: Option<u32>,
        out: &mut Vec<Chunk>,
    ) {
        let normalized = normalize_text(text);
        if normalized.chars().count() < MIN_TEXT_CHARS {
            return;
        }
        let pieces = match self.strategy {
            ChunkStrategy::Word => self.split_words(&normalized),
            ChunkStrategy::Sentence => self.accumulate_units(split_sentences(&normalized), true),
            ChunkStrategy::Paragraph => {
                // Paragraph boundaries live in the raw text; normalization
                // collapses blank lines, so split first and normalize each
                // paragraph on its own.
                let paragraphs: Vec<String> = text
                    .split("\n\n")
                    .map(normalize_text)
                    .filter(|p| !p.is_empty())
                    .collect();
                self.accumulate_units(paragraphs, false)
            }
        };
        for piece in pieces {
            let chunk_id = out.len();
            out.push(Chunk::new(piece, chunk_id, page_number, document, self.strategy));
        }
    }

    /// Word strategy: consecutive windows of `max_length` words advancing by
    /// `max_length - overlap` each step.
    fn split_words(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let step = self.max_length - self.overlap;
        let mut pieces = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = usize::min(start + self.max_length, words.len());
            pieces.push(words[start..end].join(" "));
            start += step;
        }
        pieces
    }

    /// Sentence/paragraph strategy: accumulate units until adding the next
    /// one would exceed `max_length` words, then close the chunk. With
    /// `carry_overlap` the trailing units fitting within `overlap` words seed
    /// the next chunk. A single oversized unit is emitted alone.
    fn accumulate_units(&self, units: Vec<String>, carry_overlap: bool) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_words = 0usize;

        for unit in units {
            let unit_words = unit.split_whitespace().count();
            if unit_words == 0 {
                continue;
            }
            if unit_words > self.max_length {
                if !current.is_empty() {
                    pieces.push(current.join(" "));
                    current.clear();
                    current_words = 0;
                }
                pieces.push(unit);
                continue;
            }
            if current_words + unit_words > self.max_length && !current.is_empty() {
                pieces.push(current.join(" "));
                if carry_overlap {
                    let (seed, seed_words) = trailing_within(&current, self.overlap);
                    current = seed;
                    current_words = seed_words;
                } else {
                    current.clear();
                    current_words = 0;
                }
            }
            current_words += unit_words;
            current.push(unit);
        }
        if !current.is_empty() {
            pieces.push(current.join(" "));
        }
        pieces
    }
}

/// Trailing units of `current` whose combined word count fits within
/// `overlap`, counted from the end.
fn trailing_within(current: &[String], overlap: usize) -> (Vec<String>, usize) {
    let mut seed: Vec<String> = Vec::new();
    let mut words = 0usize;
    for unit in current.iter().rev() {
        let unit_words = unit.split_whitespace().count();
        if words + unit_words > overlap {
            break;
        }
        words += unit_words;
        seed.push(unit.clone());
    }
    seed.reverse();
    (seed, words)
}

/// Terminator-based sentence split. The terminator stays attached to its
/// sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch == '.' || ch == '?' || ch == '!' || ch == '。' {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}
