//! hudsucker adapter.
//!
//! Turns proxied hyper requests into [`ProxyRequest`]s for the engine and
//! engine results back into hyper responses. `CONNECT` tunnels are relayed
//! without interception.

use http_body_util::{BodyExt, Full};
use hudsucker::{
    hyper::{Request, Response},
    Body, HttpContext, HttpHandler, RequestOrResponse,
};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue};
use hyper::http::uri::Authority;
use hyper::{Method, StatusCode};

use snapcache_core::{Headers, HttpResponse, ProxyRequest};

use crate::engine::{ProxyCore, Served, Source};
use crate::error::ProxyError;

/// Response header naming where a response came from.
pub const SOURCE_HEADER: &str = "x-snapcache";

/// Helper to convert bytes to Body
fn bytes_to_body(bytes: Bytes) -> Body {
    Body::from(Full::new(bytes))
}

/// HTTP handler that serves every plain HTTP request through the cache.
#[derive(Clone, Debug)]
pub struct CachingHandler {
    core: ProxyCore,
}

impl CachingHandler {
    /// Creates a handler backed by `core`.
    pub fn new(core: ProxyCore) -> Self {
        Self { core }
    }

    /// Returns the engine.
    pub fn core(&self) -> &ProxyCore {
        &self.core
    }

    /// Handles one request. `CONNECT` is handed back to hudsucker.
    pub async fn respond(&self, req: Request<Body>) -> RequestOrResponse {
        if *req.method() == Method::CONNECT {
            tracing::trace!("Relaying tunnel to {}", req.uri());
            return RequestOrResponse::Request(req);
        }

        let request = match into_proxy_request(req).await {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Rejecting request: {}", e);
                return RequestOrResponse::Response(bad_request(&e));
            }
        };

        let served = self.core.handle(request).await;
        RequestOrResponse::Response(into_hyper_response(served))
    }
}

impl HttpHandler for CachingHandler {
    async fn handle_request(
        &mut self,
        _ctx: &HttpContext,
        req: Request<Body>,
    ) -> RequestOrResponse {
        self.respond(req).await
    }

    async fn handle_response(&mut self, _ctx: &HttpContext, res: Response<Body>) -> Response<Body> {
        res
    }

    async fn should_intercept(&mut self, _ctx: &HttpContext, _req: &Request<Body>) -> bool {
        false
    }
}

/// Lowercases the host and drops the default port.
fn normalize_authority(authority: &Authority) -> String {
    let host = authority.host().to_ascii_lowercase();
    match authority.port_u16() {
        Some(port) if port != 80 => format!("{}:{}", host, port),
        _ => host,
    }
}

/// Extracts host from request URI or Host header.
fn extract_host(req: &Request<Body>) -> Option<String> {
    if let Some(authority) = req.uri().authority() {
        return Some(normalize_authority(authority));
    }

    req.headers()
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<Authority>().ok())
        .map(|authority| normalize_authority(&authority))
}

/// Buffers a hyper request into the engine's request model.
async fn into_proxy_request(req: Request<Body>) -> Result<ProxyRequest, ProxyError> {
    if let Some(scheme) = req.uri().scheme_str() {
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(ProxyError::MalformedRequest(format!(
                "unsupported scheme {}",
                scheme
            )));
        }
    }

    let host = extract_host(&req)
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ProxyError::MalformedRequest(format!("no host for {}", req.uri())))?;

    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| ProxyError::MalformedRequest(format!("unreadable body: {}", e)))?
        .to_bytes();

    let headers: Headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();

    let mut request = ProxyRequest::new(
        parts.method.as_str(),
        host,
        parts.uri.path(),
        parts.uri.query().map(str::to_string),
    )
    .with_body(body.to_vec());
    request.headers = headers;
    Ok(request)
}

/// Converts an engine result into a hyper response.
///
/// Header fields hyper cannot represent are dropped. The body length is
/// recomputed by hyper.
fn into_hyper_response(served: Served) -> Response<Body> {
    let Served { response, source } = served;
    let mut res = Response::new(bytes_to_body(Bytes::from(response.body)));
    *res.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = res.headers_mut();
    for (name, value) in response.headers.iter() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!("Dropping unrepresentable header {}", name),
        }
    }
    headers.insert(
        HeaderName::from_static(SOURCE_HEADER),
        HeaderValue::from_static(source.as_str()),
    );
    res
}

fn bad_request(error: &ProxyError) -> Response<Body> {
    into_hyper_response(Served {
        response: HttpResponse::new(400)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(format!("Bad Request: {}\n", error)),
        source: Source::Gateway,
    })
}
