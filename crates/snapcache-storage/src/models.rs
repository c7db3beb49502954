//! Cache entry model and its on-disk encoding.
//!
//! An entry file is one line of JSON metadata, a newline, then the raw body:
//!
//! ```text
//! {"key":"3fa0...","target":"example.com/page","status":200,...,"body_len":1234}\n
//! <1234 body bytes>
//! ```
//!
//! Compact JSON never contains a raw newline, so the first `\n` always ends
//! the metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use snapcache_core::{CacheKey, Headers, HttpResponse};

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key the entry is stored under.
    pub key: CacheKey,
    /// Human-readable request target (`host/path?query`).
    pub target: String,
    /// Response status code.
    pub status: u16,
    /// Response headers, in original order.
    pub headers: Headers,
    /// Response body.
    pub body: Vec<u8>,
    /// Raw `Content-Type` value, empty when the response had none.
    pub content_type: String,
    /// When the entry was written.
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Creates an entry from a response that is about to be stored.
    pub fn new(key: CacheKey, target: impl Into<String>, response: HttpResponse) -> Self {
        let content_type = response.content_type().unwrap_or_default().to_string();
        Self {
            key,
            target: target.into(),
            status: response.status,
            headers: response.headers,
            body: response.body,
            content_type,
            stored_at: Utc::now(),
        }
    }

    /// Converts the entry back into a servable response.
    pub fn into_response(self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// Everything but the body, as written on the first line of an entry file.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: CacheKey,
    target: String,
    status: u16,
    headers: Headers,
    content_type: String,
    stored_at: DateTime<Utc>,
    body_len: u64,
}

/// Why an entry file could not be decoded.
#[derive(Debug)]
pub(crate) enum DecodeError {
    Json(serde_json::Error),
    Invalid(String),
}

/// Serializes an entry into its file contents.
pub(crate) fn encode(entry: &CacheEntry) -> serde_json::Result<Vec<u8>> {
    let meta = EntryMeta {
        key: entry.key.clone(),
        target: entry.target.clone(),
        status: entry.status,
        headers: entry.headers.clone(),
        content_type: entry.content_type.clone(),
        stored_at: entry.stored_at,
        body_len: entry.body.len() as u64,
    };

    let mut out = serde_json::to_vec(&meta)?;
    out.reserve(entry.body.len() + 1);
    out.push(b'\n');
    out.extend_from_slice(&entry.body);
    Ok(out)
}

/// Parses file contents back into an entry, checking it belongs to `expected`.
pub(crate) fn decode(
    expected: &CacheKey,
    bytes: &[u8],
) -> std::result::Result<CacheEntry, DecodeError> {
    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| DecodeError::Invalid("missing metadata line".into()))?;

    let meta: EntryMeta = serde_json::from_slice(&bytes[..newline]).map_err(DecodeError::Json)?;
    let body = &bytes[newline + 1..];

    if &meta.key != expected {
        return Err(DecodeError::Invalid(format!(
            "entry is for key {}",
            meta.key
        )));
    }
    if body.len() as u64 != meta.body_len {
        return Err(DecodeError::Invalid(format!(
            "body is {} bytes, expected {}",
            body.len(),
            meta.body_len
        )));
    }

    Ok(CacheEntry {
        key: meta.key,
        target: meta.target,
        status: meta.status,
        headers: meta.headers,
        body: body.to_vec(),
        content_type: meta.content_type,
        stored_at: meta.stored_at,
    })
}
