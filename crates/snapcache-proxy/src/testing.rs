//! Test doubles shared by the proxy crate's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use snapcache_core::HttpResponse;

use crate::error::FetchError;
use crate::fetch::{Fetcher, OutboundRequest};

/// Fetcher that answers from a fixed URL table and counts every call.
///
/// URLs with no scripted response fail with a connect error.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    routes: Mutex<HashMap<String, HttpResponse>>,
    requests: Mutex<Vec<OutboundRequest>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(self: Arc<Self>, url: &str, response: HttpResponse) -> Arc<Self> {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: OutboundRequest) -> Result<HttpResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let route = self.routes.lock().unwrap().get(&request.url).cloned();
        self.requests.lock().unwrap().push(request.clone());
        route.ok_or_else(|| FetchError::Connect(format!("no route to {}", request.url)))
    }
}
