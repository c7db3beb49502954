//! Buffered HTTP message model.
//!
//! The proxy buffers whole requests and responses, so the engine works on
//! plain owned values rather than streaming bodies. Header order is kept as
//! received; lookups are case-insensitive.

use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// Ordered list of header fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if at least one field is named `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Appends a field, keeping any existing fields of the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replaces every field named `name` with a single field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.0.push((name, value.into()));
    }

    /// Removes every field named `name`.
    pub fn remove(&mut self, name: &str) {
        self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// Removes every field whose name is in `names`.
    pub fn remove_all(&mut self, names: &[&str]) {
        self.0
            .retain(|(n, _)| !names.iter().any(|name| n.eq_ignore_ascii_case(name)));
    }

    /// Iterates over `(name, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

/// Normalizes a `Content-Type` value to its bare media type.
///
/// `"Text/HTML; charset=utf-8"` becomes `"text/html"`.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// A client request in origin form, with its body fully buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    /// Request method, verbatim.
    pub method: String,
    /// Target host, with a non-default port if one was given.
    pub host: String,
    /// Absolute path, always starting with `/`.
    pub path: String,
    /// Query string without the leading `?`.
    pub query: Option<String>,
    /// End-to-end request headers.
    pub headers: Headers,
    /// Request body.
    pub body: Vec<u8>,
}

impl ProxyRequest {
    /// Creates a body-less request.
    ///
    /// An empty path is treated as `/`.
    pub fn new(
        method: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
    ) -> Self {
        let path = path.into();
        Self {
            method: method.into(),
            host: host.into(),
            path: if path.is_empty() { "/".to_string() } else { path },
            query,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Creates a `GET` request for `host` and a path that may carry a query.
    pub fn get(host: impl Into<String>, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path_and_query, None),
        };
        Self::new("GET", host, path, query)
    }

    /// Adds a header field.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Derives the cache key for this request.
    pub fn key(&self) -> CacheKey {
        CacheKey::derive(&self.method, &self.host, &self.path, self.query.as_deref())
    }

    /// Returns the path and query as sent on the request line.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Returns the human-readable target, `host/path?query`.
    pub fn target(&self) -> String {
        format!("{}{}", self.host, self.path_and_query())
    }

    /// Returns the absolute `http://` URL of the target.
    pub fn url(&self) -> String {
        format!("http://{}", self.target())
    }
}

/// A fully buffered response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates an empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header field.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the raw `Content-Type` header value.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Returns the `Location` header value.
    pub fn location(&self) -> Option<&str> {
        self.headers.get("location")
    }

    /// Returns true for any 3xx status.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    /// Returns true if the declared media type is an HTML document.
    pub fn is_html(&self) -> bool {
        self.content_type()
            .map(media_type)
            .is_some_and(|t| t == "text/html" || t == "application/xhtml+xml")
    }
}
