//! Error types for the proxy.

use thiserror::Error;

use snapcache_core::ReportError;
use snapcache_storage::StorageError;

/// Proxy error type.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Cache directory error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Content-type report error.
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    /// Outbound client error.
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// The origin could not be reached; nothing was cached.
    #[error("Origin unreachable for {target}: {source}")]
    OriginUnreachable {
        /// Request target that failed.
        target: String,
        /// Underlying fetch failure.
        source: FetchError,
    },

    /// The client request has no usable host or is not plain HTTP.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Signing authority error.
    #[error("Authority error: {0}")]
    Authority(String),

    /// Proxy server error.
    #[error("Proxy error: {0}")]
    Proxy(String),
}

/// Outbound fetch error type.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request could not be built (bad method, URL, or header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Could not connect (DNS, refused, TLS handshake).
    #[error("connection failed: {0}")]
    Connect(String),

    /// The fetch did not finish within the configured timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Any other transport failure, including reading the body.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_builder() {
            FetchError::InvalidRequest(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

/// Result type for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;
