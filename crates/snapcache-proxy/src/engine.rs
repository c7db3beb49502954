//! Cache-hit versus cache-miss orchestration.
//!
//! ## Request flow
//!
//! ```text
//! ProxyRequest → CacheKey → Store hit? ──yes──► cached response
//!                               │
//!                               no
//!                               ▼
//!                         Origin fetch ──error──► 502, nothing stored
//!                               │
//!                               ▼
//!                      Redirect follower (one HTTPS hop)
//!                               │
//!                               ▼
//!                      Fragment injection (HTML only)
//!                               │
//!                               ▼
//!                      Content-type tally (if enabled)
//!                               │
//!                               ▼
//!                      Store write (overwrite) ──► fresh response
//! ```
//!
//! Cache-control, ETags and expiry are ignored on purpose: every response
//! is stored, and a stored entry is replayed without revalidation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use snapcache_core::{CacheKey, ContentTypeTally, HttpResponse, ProxyRequest, ResponseTransformer};
use snapcache_storage::{CacheEntry, CacheStore};

use crate::error::ProxyError;
use crate::fetch::{strip_hop_by_hop, Fetcher, OutboundRequest};
use crate::redirect::{ChaseOutcome, RedirectFollower};

/// Whether the cache is consulted and whether it is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Serve stored entries on a hit.
    pub read_from_cache: bool,
    /// Store fresh responses.
    pub save_to_cache: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            read_from_cache: true,
            save_to_cache: true,
        }
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Replayed from the cache directory.
    Cache,
    /// Fetched from the origin (or its HTTPS redirect target).
    Origin,
    /// Generated by the proxy because the origin was unreachable.
    Gateway,
}

impl Source {
    /// Short label used in the `X-Snapcache` response header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "hit",
            Source::Origin => "miss",
            Source::Gateway => "error",
        }
    }
}

/// A response ready for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    /// The response.
    pub response: HttpResponse,
    /// Where it came from.
    pub source: Source,
}

/// A stored redirect, keyed by the normalized key of the request it answered.
#[derive(Debug, Clone)]
struct RedirectLink {
    /// Normalized key the redirect points at.
    target: CacheKey,
    /// Key the redirect is stored under.
    stored_as: CacheKey,
}

/// The caching engine.
#[derive(Clone)]
pub struct ProxyCore {
    store: CacheStore,
    origin: Arc<dyn Fetcher>,
    follower: RedirectFollower,
    transformer: ResponseTransformer,
    tally: Option<ContentTypeTally>,
    policy: CachePolicy,
    redirects: Arc<Mutex<HashMap<CacheKey, RedirectLink>>>,
}

impl std::fmt::Debug for ProxyCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCore")
            .field("store", &self.store)
            .field("origin", &"dyn Fetcher")
            .field("follower", &self.follower)
            .field("transformer", &self.transformer)
            .field("tally", &self.tally.is_some())
            .field("policy", &self.policy)
            .field("redirects", &self.redirects.lock().len())
            .finish()
    }
}

impl ProxyCore {
    /// Creates an engine that uses `origin` for both origin and secure fetches.
    pub fn new(store: CacheStore, origin: Arc<dyn Fetcher>) -> Self {
        Self {
            store,
            follower: RedirectFollower::new(origin.clone()),
            origin,
            transformer: ResponseTransformer::default(),
            tally: None,
            policy: CachePolicy::default(),
            redirects: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Uses a separate fetcher for the HTTPS redirect chase.
    pub fn with_secure_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.follower = RedirectFollower::new(fetcher);
        self
    }

    /// Sets the HTML transformer.
    pub fn with_transformer(mut self, transformer: ResponseTransformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Enables content-type accounting into `tally`.
    pub fn with_tally(mut self, tally: ContentTypeTally) -> Self {
        self.tally = Some(tally);
        self
    }

    /// Sets the read/write policy.
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the backing store.
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Returns the content-type tally, if accounting is enabled.
    pub fn tally(&self) -> Option<&ContentTypeTally> {
        self.tally.as_ref()
    }

    /// Returns the read/write policy.
    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Handles one client request. Always produces a response.
    pub async fn handle(&self, request: ProxyRequest) -> Served {
        let key = request.key();

        if self.policy.read_from_cache {
            if let Some(response) = self.lookup(&key, &request).await {
                return Served {
                    response,
                    source: Source::Cache,
                };
            }
        }

        tracing::debug!("Cache miss for {} {}", request.method, request.target());
        self.fill(key, request).await
    }

    /// Reads the stored entry. Unreadable entries count as misses.
    async fn lookup(&self, key: &CacheKey, request: &ProxyRequest) -> Option<HttpResponse> {
        let store = self.store.clone();
        let lookup_key = key.clone();
        let result = tokio::task::spawn_blocking(move || store.get(&lookup_key)).await;

        match result {
            Ok(Ok(Some(entry))) => {
                tracing::debug!("Cache hit for {} {}", request.method, request.target());
                Some(entry.into_response())
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                tracing::warn!(
                    "Unreadable cache entry for {}, refetching: {}",
                    request.target(),
                    e
                );
                None
            }
            Err(e) => {
                tracing::warn!("Cache lookup task failed for {}: {}", request.target(), e);
                None
            }
        }
    }

    /// Fetches, transforms, tallies and stores a fresh response.
    async fn fill(&self, key: CacheKey, request: ProxyRequest) -> Served {
        let response = match self.origin.fetch(OutboundRequest::origin(&request)).await {
            Ok(response) => response,
            Err(source) => {
                let error = ProxyError::OriginUnreachable {
                    target: request.target(),
                    source,
                };
                tracing::error!("{}", error);
                return Served {
                    response: gateway_response(&error),
                    source: Source::Gateway,
                };
            }
        };

        let outcome = self.follower.follow(&request, response).await;
        if let ChaseOutcome::Followed { target, .. } = &outcome {
            tracing::debug!("Caching {} under {}", target, request.target());
        }

        let mut response = outcome.into_response();
        strip_hop_by_hop(&mut response.headers);
        response.headers.remove("content-length");

        let response = self.transformer.transform(response);

        if let Some(tally) = &self.tally {
            tally.classify(response.content_type());
        }

        if self.policy.save_to_cache {
            let origin = normalized_key(&request);
            match redirect_key(&request, &response) {
                Some(target) if target == origin => {
                    tracing::debug!("Not storing self-redirect for {}", request.target());
                }
                target => {
                    self.record_redirect(origin, target, &key, &request).await;
                    self.save(key, &request, &response).await;
                }
            }
        }

        Served {
            response,
            source: Source::Origin,
        }
    }

    /// Remembers where the response stored for `origin` redirects to.
    ///
    /// If the target's own stored redirect points back at `origin`, the
    /// target's entry is removed so a replay cannot bounce between the two.
    async fn record_redirect(
        &self,
        origin: CacheKey,
        target: Option<CacheKey>,
        stored_as: &CacheKey,
        request: &ProxyRequest,
    ) {
        let partner = {
            let mut redirects = self.redirects.lock();
            match target {
                None => {
                    redirects.remove(&origin);
                    None
                }
                Some(target) => {
                    let partner = redirects
                        .get(&target)
                        .filter(|link| link.target == origin)
                        .map(|link| link.stored_as.clone());
                    if partner.is_some() {
                        redirects.remove(&target);
                    }
                    redirects.insert(
                        origin,
                        RedirectLink {
                            target,
                            stored_as: stored_as.clone(),
                        },
                    );
                    partner
                }
            }
        };

        let Some(partner) = partner else {
            return;
        };

        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || store.remove(&partner)).await;
        match result {
            Ok(Ok(_)) => tracing::info!(
                "Broke two-entry redirect cycle at {}; dropped its partner entry",
                request.target()
            ),
            Ok(Err(e)) => tracing::warn!(
                "Failed to drop redirect cycle partner of {}: {}",
                request.target(),
                e
            ),
            Err(e) => tracing::warn!("Cache remove task failed for {}: {}", request.target(), e),
        }
    }

    /// Writes the entry. Failures are logged; the response is still served.
    async fn save(&self, key: CacheKey, request: &ProxyRequest, response: &HttpResponse) {
        let store = self.store.clone();
        let entry = CacheEntry::new(key, request.target(), response.clone());
        let result = tokio::task::spawn_blocking(move || store.put(&entry)).await;

        match result {
            Ok(Ok(())) => tracing::debug!("Stored {}", request.target()),
            Ok(Err(e)) => tracing::warn!("Failed to store {}: {}", request.target(), e),
            Err(e) => tracing::warn!("Cache write task failed for {}: {}", request.target(), e),
        }
    }
}

/// Key of a plain HTTP URL. Dot segments and the default port are already
/// normalized away by the URL parser.
fn url_key(method: &str, url: &reqwest::Url) -> Option<CacheKey> {
    if url.scheme() != "http" {
        return None;
    }

    let host = match url.port() {
        Some(port) => format!("{}:{}", url.host_str()?, port),
        None => url.host_str()?.to_string(),
    };
    Some(CacheKey::derive(method, &host, url.path(), url.query()))
}

/// Key of `request` under the same normalization as [`redirect_key`].
fn normalized_key(request: &ProxyRequest) -> CacheKey {
    reqwest::Url::parse(&request.url())
        .ok()
        .and_then(|url| url_key(&request.method, &url))
        .unwrap_or_else(|| request.key())
}

/// Normalized key the redirect in `response` points at, if it stays on plain HTTP.
fn redirect_key(request: &ProxyRequest, response: &HttpResponse) -> Option<CacheKey> {
    if !response.is_redirect() {
        return None;
    }
    let base = reqwest::Url::parse(&request.url()).ok()?;
    let url = base.join(response.location()?.trim()).ok()?;
    url_key(&request.method, &url)
}

/// The response sent when the origin cannot be reached.
pub fn gateway_response(error: &ProxyError) -> HttpResponse {
    HttpResponse::new(502)
        .with_header("Content-Type", "text/plain; charset=utf-8")
        .with_body(format!("Bad Gateway: {}\n", error))
}
