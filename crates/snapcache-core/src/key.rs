//! Cache key derivation.
//!
//! A [`CacheKey`] names one stored response. It is the lowercase hex SHA-256
//! digest of the request method, the lowercased host, the path, and the query
//! string, so it is safe to use directly as a file name.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Field separator fed to the hasher. NUL cannot appear in a method, host,
/// or request target, so adjacent fields never run together.
const SEPARATOR: [u8; 1] = [0];

/// Stable identifier of a cached response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a request.
    ///
    /// The host is compared case-insensitively. Method, path, and query are
    /// taken verbatim since origins may treat them case-sensitively. A `None`
    /// query and an empty query (`/a` vs `/a?`) produce different keys.
    pub fn derive(method: &str, host: &str, path: &str, query: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(SEPARATOR);
        hasher.update(host.to_ascii_lowercase().as_bytes());
        hasher.update(SEPARATOR);
        hasher.update(path.as_bytes());
        if let Some(query) = query {
            hasher.update(b"?");
            hasher.update(query.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Returns the key as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the two-character prefix used to shard the cache directory.
    pub fn shard(&self) -> &str {
        &self.0[..2]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = CacheKey::derive("GET", "example.com", "/page", Some("x=1"));
        let b = CacheKey::derive("GET", "example.com", "/page", Some("x=1"));
        assert_eq!(a, b);
    }

    #[test]
    fn key_is_sha256_hex() {
        let key = CacheKey::derive("GET", "example.com", "/", None);
        assert_eq!(key.as_str().len(), 64);
        assert!(key
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn host_is_case_insensitive() {
        assert_eq!(
            CacheKey::derive("GET", "EXAMPLE.com", "/page", None),
            CacheKey::derive("GET", "example.com", "/page", None)
        );
    }

    #[test]
    fn path_is_case_sensitive() {
        assert_ne!(
            CacheKey::derive("GET", "example.com", "/Page", None),
            CacheKey::derive("GET", "example.com", "/page", None)
        );
    }

    #[test]
    fn query_distinguishes_entries() {
        let x1 = CacheKey::derive("GET", "example.com", "/a", Some("x=1"));
        let x2 = CacheKey::derive("GET", "example.com", "/a", Some("x=2"));
        let none = CacheKey::derive("GET", "example.com", "/a", None);
        let empty = CacheKey::derive("GET", "example.com", "/a", Some(""));
        assert_ne!(x1, x2);
        assert_ne!(x1, none);
        assert_ne!(none, empty);
    }

    #[test]
    fn every_component_matters() {
        let base = CacheKey::derive("GET", "example.com", "/a", Some("q"));
        assert_ne!(base, CacheKey::derive("POST", "example.com", "/a", Some("q")));
        assert_ne!(base, CacheKey::derive("GET", "example.org", "/a", Some("q")));
        assert_ne!(base, CacheKey::derive("GET", "example.com", "/b", Some("q")));
    }

    #[test]
    fn fields_do_not_run_together() {
        assert_ne!(
            CacheKey::derive("GET", "example.com", "/a", None),
            CacheKey::derive("GET", "example.co", "m/a", None)
        );
    }

    #[test]
    fn shard_is_key_prefix() {
        let key = CacheKey::derive("GET", "example.com", "/", None);
        assert_eq!(key.shard(), &key.as_str()[..2]);
        assert_eq!(key.to_string(), key.as_str());
    }
}
