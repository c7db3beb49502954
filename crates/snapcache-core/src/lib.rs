//! Snapcache Core - the pure parts of the caching engine.
//!
//! This crate holds everything the proxy needs that does not touch the
//! network or the cache directory:
//!
//! - [`key`] derives the stable [`CacheKey`] for a request
//! - [`message`] is the buffered request/response model shared by the other crates
//! - [`inject`] inserts the configured fragment into HTML documents
//! - [`classifier`] keeps the running content-type tally and writes its report
//!
//! # Example
//!
//! ```
//! use snapcache_core::{CacheKey, HttpResponse, ResponseTransformer};
//!
//! let key = CacheKey::derive("GET", "Example.com", "/page", None);
//! assert_eq!(key, CacheKey::derive("GET", "example.com", "/page", None));
//!
//! let transformer = ResponseTransformer::new(Some("<script>X</script>".to_string()));
//! let response = HttpResponse::new(200)
//!     .with_header("Content-Type", "text/html")
//!     .with_body("<html><head></head></html>");
//! let response = transformer.transform(response);
//! assert_eq!(response.body, b"<html><head><script>X</script></head></html>");
//! ```

pub mod classifier;
pub mod error;
pub mod inject;
pub mod key;
pub mod message;

pub use classifier::{ContentTypeReport, ContentTypeTally, UNKNOWN_CONTENT_TYPE};
pub use error::{ReportError, Result};
pub use inject::ResponseTransformer;
pub use key::CacheKey;
pub use message::{media_type, Headers, HttpResponse, ProxyRequest};
