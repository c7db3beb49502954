//! Snapcache Proxy - forward HTTP caching proxy.
//!
//! Serves every plain HTTP request from a local cache directory when it can,
//! and otherwise fetches it from the origin, stores the result and serves it.
//! Once a response is cached it is replayed forever; nothing expires.
//!
//! ## Features
//!
//! - File-per-entry cache keyed on method, host, path and query
//! - HTTPS redirect follow-through (one hop) so secure content is cached
//!   under the original HTTP key
//! - Injection of a fixed markup fragment into HTML heads
//! - Per-content-type response accounting with a CSV report
//! - Optional upstream HTTP proxy for origin traffic
//! - `CONNECT` tunnels are relayed untouched and never cached
//!
//! ## Architecture
//!
//! ```text
//! Client Request → Proxy → CONNECT? ──yes──► Tunnel (untouched)
//!                             │
//!                             no
//!                             ▼
//!                     Normalize target ──bad──► 400
//!                             │
//!                             ▼
//!                        ProxyCore ──hit──► Cached response
//!                             │
//!                            miss
//!                             ▼
//!            Fetch → Chase HTTPS redirect → Inject → Tally → Store
//! ```

mod authority;
pub mod engine;
mod error;
pub mod fetch;
mod handler;
mod proxy;
pub mod redirect;

#[cfg(test)]
mod testing;

pub use authority::ephemeral_authority;
pub use engine::{gateway_response, CachePolicy, ProxyCore, Served, Source};
pub use error::{FetchError, ProxyError, Result};
pub use fetch::{Fetcher, HttpFetcher, OutboundRequest, DEFAULT_FETCH_TIMEOUT};
pub use handler::{CachingHandler, SOURCE_HEADER};
pub use proxy::{ProxyConfig, ProxyHandle, ProxyServer};
pub use redirect::{ChaseOutcome, RedirectFollower};

/// Default proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 1234;

/// Default cache directory, relative to the working directory.
pub const DEFAULT_CACHE_DIR: &str = ".cache";

/// Default content-type report file.
pub const DEFAULT_REPORT_FILE: &str = "content-type.csv";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_correct() {
        assert_eq!(DEFAULT_PROXY_PORT, 1234);
    }

    #[test]
    fn default_paths() {
        assert_eq!(DEFAULT_CACHE_DIR, ".cache");
        assert_eq!(DEFAULT_REPORT_FILE, "content-type.csv");
    }
}
