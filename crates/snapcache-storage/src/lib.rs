//! Snapcache Storage - durable response store.
//!
//! Every cached response lives in its own file under the cache directory,
//! named after its [`CacheKey`](snapcache_core::CacheKey):
//!
//! ```text
//! .cache/
//!   3f/
//!     3fa0...c1.entry
//!   b7/
//!     b712...09.entry
//! ```
//!
//! Writes go to a temporary file in the same directory and are renamed into
//! place, so readers see either the previous entry or the new one. Entries
//! are never versioned or evicted; the cache grows with the traffic.
//!
//! # Example
//!
//! ```no_run
//! use snapcache_core::{HttpResponse, ProxyRequest};
//! use snapcache_storage::{CacheEntry, CacheStore};
//!
//! let store = CacheStore::open(".cache").unwrap();
//! let request = ProxyRequest::get("example.com", "/");
//! let response = HttpResponse::new(200).with_body("hello");
//!
//! store.put(&CacheEntry::new(request.key(), request.target(), response)).unwrap();
//! assert!(store.get(&request.key()).unwrap().is_some());
//! ```

pub mod error;
pub mod models;
mod store;

pub use error::{Result, StorageError};
pub use models::CacheEntry;
pub use store::{CacheStore, ENTRY_EXTENSION};
