//! Error types for core operations.

use thiserror::Error;

/// Errors that can occur while writing the content-type report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// IO error (e.g., report directory missing).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV serialization error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, ReportError>;
