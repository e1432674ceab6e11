//! Common error types for tile synchronization.

use thiserror::Error;

/// Top-level error type for tile sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failed before a response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// Remote answered with an unexpected status code.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Incremental result set too large; the tile must be exported instead.
    #[error("Result set too large: {0}")]
    Overflow(String),

    /// Downloaded snapshot failed size or hash verification.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Snapshot could not be decompressed.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Local tile store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Scheduler is not running or dropped the request.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl Error {
    /// Whether this is the server's "too large, export instead" signal.
    pub fn is_overflow(&self) -> bool {
        matches!(self, Error::Overflow(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
