use thiserror::Error;

/// Structured error type for the retrieval core.
///
/// Variants carry a kind plus message so callers can decide on retry without
/// parsing strings.
#[derive(Error, Debug)]
pub enum RagError {
    /// User input error (empty query, unknown strategy, too many documents).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Durable index storage error (I/O, permissions, missing directory).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A persisted index or sidecar could not be decoded.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// The embedding provider failed to produce vectors. Not retried by the
    /// core; the caller decides.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The external generative model failed.
    #[error("Generation error: {0}")]
    Generation(String),

    /// Internal invariant violation (index/metadata length mismatch, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::Storage(err.to_string())
    }
}
