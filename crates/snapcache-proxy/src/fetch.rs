//! Outbound fetching.
//!
//! The engine talks to origins through the [`Fetcher`] trait so tests can
//! substitute counting mocks. [`HttpFetcher`] is the real implementation,
//! backed by `reqwest`. It never follows redirects by itself; the single
//! allowed hop is the redirect follower's decision.

use std::time::Duration;

use async_trait::async_trait;

use snapcache_core::{Headers, HttpResponse, ProxyRequest};

use crate::error::FetchError;

/// Default bound on one outbound fetch, connect through last body byte.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection-scoped headers that must not cross the proxy.
pub(crate) const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers the client library sets itself, or that would stop the
/// origin from sending an identity-encoded body.
const CLIENT_MANAGED: &[&str] = &["host", "content-length", "accept-encoding"];

/// Credentials that only travel to the host they were sent for.
const CREDENTIALS: &[&str] = &["cookie", "authorization", "proxy-authorization"];

/// Removes hop-by-hop headers, including any listed in `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut Headers) {
    let listed: Vec<String> = headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("connection"))
        .flat_map(|(_, value)| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    headers.remove_all(HOP_BY_HOP);
    for name in &listed {
        headers.remove(name);
    }
}

/// A request ready to leave the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    /// Request method.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Headers to send.
    pub headers: Headers,
    /// Body to send.
    pub body: Vec<u8>,
}

impl OutboundRequest {
    /// Builds the origin request for a client request.
    pub fn origin(request: &ProxyRequest) -> Self {
        Self {
            method: request.method.clone(),
            url: request.url(),
            headers: forwardable_headers(&request.headers),
            body: request.body.clone(),
        }
    }

    /// Builds the `GET` for an HTTPS redirect target on behalf of `request`.
    ///
    /// The body and its headers are dropped, as a browser would after a 302.
    /// Credentials are dropped too when `url` is on another host.
    pub fn secure_get(url: impl Into<String>, request: &ProxyRequest) -> Self {
        let url = url.into();
        let mut headers = forwardable_headers(&request.headers);
        headers.remove("content-type");
        if !same_host(&url, &request.host) {
            headers.remove_all(CREDENTIALS);
        }
        Self {
            method: "GET".to_string(),
            url,
            headers,
            body: Vec::new(),
        }
    }
}

/// Returns true if `url` names the same host as `host` (ports ignored).
fn same_host(url: &str, host: &str) -> bool {
    let target = reqwest::Url::parse(url).ok();
    let origin = reqwest::Url::parse(&format!("http://{}/", host)).ok();
    match (target, origin) {
        (Some(target), Some(origin)) => {
            target.host_str().is_some() && target.host_str() == origin.host_str()
        }
        _ => false,
    }
}

fn forwardable_headers(headers: &Headers) -> Headers {
    let mut headers = headers.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove_all(CLIENT_MANAGED);
    headers
}

/// Performs one outbound request and buffers the whole response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Sends `request` and returns the response.
    ///
    /// Only transport failures are errors; any HTTP status is a response.
    async fn fetch(&self, request: OutboundRequest) -> Result<HttpResponse, FetchError>;
}

/// `reqwest`-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher that connects directly with the given timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        Self::build(timeout, None)
    }

    /// Creates a fetcher that sends every request through an HTTP proxy.
    pub fn with_upstream(timeout: Duration, upstream: &str) -> Result<Self, FetchError> {
        Self::build(timeout, Some(upstream))
    }

    fn build(timeout: Duration, upstream: Option<&str>) -> Result<Self, FetchError> {
        let builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout);

        let builder = match upstream {
            Some(url) => builder.proxy(reqwest::Proxy::http(url)?),
            None => builder.no_proxy(),
        };

        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: OutboundRequest) -> Result<HttpResponse, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        tracing::trace!("Fetched {} -> {} ({} bytes)", request.url, status, body.len());

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_request() -> ProxyRequest {
        ProxyRequest::new("POST", "example.com", "/form", Some("a=1".to_string()))
            .with_header("Host", "example.com")
            .with_header("User-Agent", "test-agent")
            .with_header("Proxy-Connection", "keep-alive")
            .with_header("Connection", "keep-alive, X-Private")
            .with_header("X-Private", "secret")
            .with_header("Accept-Encoding", "gzip")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_header("Content-Length", "3")
            .with_body("x=1")
    }

    #[test]
    fn origin_request_targets_http_url() {
        let outbound = OutboundRequest::origin(&client_request());
        assert_eq!(outbound.method, "POST");
        assert_eq!(outbound.url, "http://example.com/form?a=1");
        assert_eq!(outbound.body, b"x=1");
    }

    #[test]
    fn origin_request_drops_hop_by_hop_and_managed_headers() {
        let headers = OutboundRequest::origin(&client_request()).headers;
        assert_eq!(headers.get("user-agent"), Some("test-agent"));
        assert_eq!(
            headers.get("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        for dropped in [
            "host",
            "proxy-connection",
            "connection",
            "x-private",
            "accept-encoding",
            "content-length",
        ] {
            assert!(!headers.contains(dropped), "{} should be dropped", dropped);
        }
    }

    #[test]
    fn secure_get_has_no_body() {
        let outbound = OutboundRequest::secure_get("https://example.com/new", &client_request());
        assert_eq!(outbound.method, "GET");
        assert_eq!(outbound.url, "https://example.com/new");
        assert!(outbound.body.is_empty());
        assert!(!outbound.headers.contains("content-type"));
        assert_eq!(outbound.headers.get("user-agent"), Some("test-agent"));
    }

    #[test]
    fn secure_get_keeps_credentials_on_same_host() {
        let request = ProxyRequest::get("bank.example:8080", "/old")
            .with_header("Cookie", "session=abc")
            .with_header("Authorization", "Basic dXNlcjpwYXNz");

        let outbound = OutboundRequest::secure_get("https://Bank.example/new", &request);
        assert_eq!(outbound.headers.get("cookie"), Some("session=abc"));
        assert_eq!(outbound.headers.get("authorization"), Some("Basic dXNlcjpwYXNz"));
    }

    #[test]
    fn secure_get_drops_credentials_across_hosts() {
        let request = ProxyRequest::get("bank.example", "/old")
            .with_header("Cookie", "session=abc")
            .with_header("Authorization", "Basic dXNlcjpwYXNz")
            .with_header("User-Agent", "test-agent");

        let outbound = OutboundRequest::secure_get("https://other.example/new", &request);
        assert!(!outbound.headers.contains("cookie"));
        assert!(!outbound.headers.contains("authorization"));
        assert_eq!(outbound.headers.get("user-agent"), Some("test-agent"));
    }

    #[test]
    fn same_host_comparison() {
        assert!(same_host("https://example.com/a", "example.com"));
        assert!(same_host("https://example.com:8443/a", "example.com:8080"));
        assert!(!same_host("https://www.example.com/", "example.com"));
        assert!(!same_host("not a url", "example.com"));
    }

    #[test]
    fn strip_hop_by_hop_on_responses() {
        let mut headers: Headers = [
            ("Transfer-Encoding", "chunked"),
            ("Keep-Alive", "timeout=5"),
            ("Content-Type", "text/html"),
        ]
        .into_iter()
        .collect();
        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains("content-type"));
    }

    #[test]
    fn http_fetcher_builds() {
        assert!(HttpFetcher::new(DEFAULT_FETCH_TIMEOUT).is_ok());
        assert!(HttpFetcher::with_upstream(DEFAULT_FETCH_TIMEOUT, "http://127.0.0.1:1235").is_ok());
    }

    #[tokio::test]
    async fn http_fetcher_reports_unreachable_origin() {
        // Bind and drop a listener to get a port nothing is listening on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let fetcher = HttpFetcher::new(Duration::from_secs(5)).unwrap();
        let request = ProxyRequest::get(format!("127.0.0.1:{}", port), "/");

        let result = fetcher.fetch(OutboundRequest::origin(&request)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn http_fetcher_rejects_bad_method() {
        let fetcher = HttpFetcher::new(DEFAULT_FETCH_TIMEOUT).unwrap();
        let request = ProxyRequest::new("BAD METHOD", "example.com", "/", None);
        let result = fetcher.fetch(OutboundRequest::origin(&request)).await;
        assert!(matches!(result, Err(FetchError::InvalidRequest(_))));
    }
}
