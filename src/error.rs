//! Error types for the context memory engine

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Errors surfaced by the context memory engine and its repositories
#[derive(Debug, Error)]
pub enum MemoryError {
    /// The context id matched a configured ignore pattern; rejected before
    /// any state mutation.
    #[error("context '{0}' matches an ignore pattern")]
    IgnoredContext(String),

    /// A subsystem (vector index, relationship graph) is unavailable for the
    /// lifetime of this instance.
    #[error("subsystem unavailable: {0}")]
    SubsystemUnavailable(String),

    /// The summarizer produced no usable text.
    #[error("summarization failed: {0}")]
    SummarizationFailed(String),

    /// A requested context or meta-summary does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Durable store read/write failure.
    #[error("store error: {0}")]
    Store(String),

    /// Embedding pipeline failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Invalid or unloadable configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        MemoryError::Store(format!("serialization failed: {}", e))
    }
}

impl From<std::io::Error> for MemoryError {
    fn from(e: std::io::Error) -> Self {
        MemoryError::Store(format!("io error: {}", e))
    }
}
