//! Storage error types.

use thiserror::Error;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error (e.g., creating directories, reading an entry).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry metadata could not be serialized or parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Entry file exists but does not hold a valid entry.
    #[error("Corrupt entry {path}: {reason}")]
    Corrupt {
        /// Path of the offending file.
        path: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
