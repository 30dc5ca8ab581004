//! State store error types.

use thiserror::Error;

/// Errors surfaced by either storage backend. The store never retries.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid state document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("state document must be a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("storage provider error: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    /// Wrap an error raised by a host storage provider.
    pub fn provider(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Provider(err.into())
    }
}

/// Result type for state store operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
