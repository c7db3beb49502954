//! HTTPS redirect follow-through.
//!
//! The proxy never terminates inbound TLS, so content that an origin only
//! serves behind an `http -> https` redirect would never be cached. The
//! follower closes that gap by fetching the HTTPS target itself, once.
//!
//! ```text
//! Start ──► CheckRedirect ──(3xx + https Location)──► FetchSecure
//!               │                                        │    │
//!               │ otherwise                       success│    │failure
//!               ▼                                        ▼    ▼
//!              Done(original)              Done(fetched)  Done(original)
//! ```
//!
//! Chains are not followed: if the fetched response is itself a redirect,
//! it is what the client gets.

use std::sync::Arc;

use snapcache_core::{HttpResponse, ProxyRequest};

use crate::error::FetchError;
use crate::fetch::{Fetcher, OutboundRequest};

/// Result of running one response through the follower.
#[derive(Debug)]
pub enum ChaseOutcome {
    /// Not an HTTPS redirect; the original response.
    NotChased(HttpResponse),
    /// The HTTPS target was fetched and replaces the redirect.
    Followed {
        /// URL that was fetched.
        target: String,
        /// The fetched response.
        response: HttpResponse,
    },
    /// The secure fetch failed; the original redirect is kept.
    Failed {
        /// URL that was attempted.
        target: String,
        /// Why the fetch failed.
        error: FetchError,
        /// The original redirect response.
        response: HttpResponse,
    },
}

impl ChaseOutcome {
    /// Returns the response to continue with.
    pub fn into_response(self) -> HttpResponse {
        match self {
            ChaseOutcome::NotChased(response)
            | ChaseOutcome::Followed { response, .. }
            | ChaseOutcome::Failed { response, .. } => response,
        }
    }

    /// Returns true if a secure fetch was attempted.
    pub fn attempted(&self) -> bool {
        !matches!(self, ChaseOutcome::NotChased(_))
    }
}

/// Single-hop HTTPS redirect follower.
#[derive(Clone)]
pub struct RedirectFollower {
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for RedirectFollower {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectFollower")
            .field("fetcher", &"dyn Fetcher")
            .finish()
    }
}

impl RedirectFollower {
    /// Creates a follower that makes its secure fetches with `fetcher`.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Returns the HTTPS URL to chase, if `response` is a redirect to one.
    pub fn secure_target(response: &HttpResponse) -> Option<String> {
        if !response.is_redirect() {
            return None;
        }
        let location = response.location()?.trim();
        let url = reqwest::Url::parse(location).ok()?;
        (url.scheme() == "https").then(|| url.to_string())
    }

    /// Runs `response` (received for `request`) through the state machine.
    pub async fn follow(&self, request: &ProxyRequest, response: HttpResponse) -> ChaseOutcome {
        let Some(target) = Self::secure_target(&response) else {
            return ChaseOutcome::NotChased(response);
        };

        tracing::debug!("Following redirect {} -> {}", request.target(), target);

        match self
            .fetcher
            .fetch(OutboundRequest::secure_get(target.clone(), request))
            .await
        {
            Ok(fetched) => {
                tracing::info!(
                    "Fetched secure target {} for {} ({})",
                    target,
                    request.target(),
                    fetched.status
                );
                ChaseOutcome::Followed {
                    target,
                    response: fetched,
                }
            }
            Err(error) => {
                tracing::warn!(
                    "Secure fetch of {} failed, keeping redirect: {}",
                    target,
                    error
                );
                ChaseOutcome::Failed {
                    target,
                    error,
                    response,
                }
            }
        }
    }
}
