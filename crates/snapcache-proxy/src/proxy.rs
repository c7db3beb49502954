//! Caching proxy server.
//!
//! Wires the engine into a hudsucker listener and owns the lifecycle of the
//! content-type report.

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hudsucker::rustls::crypto::aws_lc_rs::default_provider;
use hudsucker::Proxy;
use tokio::sync::broadcast;

use snapcache_core::{ContentTypeReport, ContentTypeTally, ResponseTransformer};
use snapcache_storage::CacheStore;

use crate::authority::ephemeral_authority;
use crate::engine::{CachePolicy, ProxyCore};
use crate::error::{ProxyError, Result};
use crate::fetch::{Fetcher, HttpFetcher, DEFAULT_FETCH_TIMEOUT};
use crate::handler::CachingHandler;
use crate::{DEFAULT_CACHE_DIR, DEFAULT_PROXY_PORT};

/// Proxy server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Address to bind the proxy to.
    pub addr: SocketAddr,
    /// Directory holding cache entries.
    pub cache_dir: PathBuf,
    /// Markup inserted after the opening head tag of HTML responses.
    pub inject_fragment: Option<String>,
    /// Where to write the content-type report. `None` disables accounting.
    pub content_type_report: Option<PathBuf>,
    /// How often the report is rewritten while running.
    pub report_flush_interval: Option<Duration>,
    /// HTTP proxy that origin fetches are sent through.
    pub upstream_proxy: Option<String>,
    /// Bound on each outbound fetch.
    pub fetch_timeout: Duration,
    /// Cache read/write policy.
    pub policy: CachePolicy,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PROXY_PORT)),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            inject_fragment: None,
            content_type_report: None,
            report_flush_interval: None,
            upstream_proxy: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            policy: CachePolicy::default(),
        }
    }
}

impl ProxyConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the listen address.
    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Sets the port (uses 127.0.0.1 as host).
    pub fn with_port(mut self, port: u16) -> Self {
        self.addr = SocketAddr::from(([127, 0, 0, 1], port));
        self
    }

    /// Sets the cache directory.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Sets the injected fragment. An empty fragment disables injection.
    pub fn with_inject_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.inject_fragment = Some(fragment.into());
        self
    }

    /// Enables the content-type report at `path`.
    pub fn with_content_type_report(mut self, path: impl Into<PathBuf>) -> Self {
        self.content_type_report = Some(path.into());
        self
    }

    /// Rewrites the report every `interval` while running.
    pub fn with_report_flush_interval(mut self, interval: Duration) -> Self {
        self.report_flush_interval = Some(interval);
        self
    }

    /// Routes origin fetches through an HTTP proxy.
    pub fn with_upstream_proxy(mut self, url: impl Into<String>) -> Self {
        self.upstream_proxy = Some(url.into());
        self
    }

    /// Sets the outbound fetch timeout.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the cache read/write policy.
    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Caching forward proxy server.
#[derive(Debug)]
pub struct ProxyServer {
    config: ProxyConfig,
    core: ProxyCore,
}

impl ProxyServer {
    /// Creates a server, opening the cache directory.
    ///
    /// Fails if the cache directory cannot be created or read, or if an
    /// outbound client cannot be built.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let store = CacheStore::open(config.cache_dir.clone())?;

        let origin: Arc<dyn Fetcher> = match &config.upstream_proxy {
            Some(upstream) => {
                tracing::info!("Origin fetches go through {}", upstream);
                Arc::new(HttpFetcher::with_upstream(config.fetch_timeout, upstream)?)
            }
            None => Arc::new(HttpFetcher::new(config.fetch_timeout)?),
        };
        let secure: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config.fetch_timeout)?);

        let mut core = ProxyCore::new(store, origin)
            .with_secure_fetcher(secure)
            .with_transformer(ResponseTransformer::new(config.inject_fragment.clone()))
            .with_policy(config.policy);
        if config.content_type_report.is_some() {
            core = core.with_tally(ContentTypeTally::new());
        }

        Ok(Self::with_core(config, core))
    }

    /// Creates a server around an existing engine.
    pub fn with_core(config: ProxyConfig, core: ProxyCore) -> Self {
        Self { config, core }
    }

    /// Returns the address the proxy is configured to listen on.
    pub fn addr(&self) -> SocketAddr {
        self.config.addr
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Returns the engine.
    pub fn core(&self) -> &ProxyCore {
        &self.core
    }

    /// Returns the content-type tally, if accounting is enabled.
    pub fn tally(&self) -> Option<&ContentTypeTally> {
        self.core.tally()
    }

    /// Writes the content-type report now.
    ///
    /// Returns `None` when accounting is disabled.
    pub fn flush_report(&self) -> Result<Option<ContentTypeReport>> {
        match (self.core.tally(), &self.config.content_type_report) {
            (Some(tally), Some(path)) => Ok(Some(flush(tally, path)?)),
            _ => Ok(None),
        }
    }

    /// Starts the proxy server and runs until Ctrl-C.
    ///
    /// The content-type report is flushed once more after the listener stops.
    pub async fn run(self) -> Result<()> {
        self.serve(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutdown signal received"),
                Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
            }
        })
        .await
    }

    /// Runs the proxy server until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let authority = ephemeral_authority()?;
        let handler = CachingHandler::new(self.core.clone());

        tracing::info!("Starting caching proxy on {}", self.config.addr);
        tracing::info!("Cache directory: {:?}", self.core.store().root());

        let proxy = Proxy::builder()
            .with_addr(self.config.addr)
            .with_ca(authority)
            .with_rustls_connector(default_provider())
            .with_http_handler(handler)
            .with_graceful_shutdown(shutdown)
            .build()
            .map_err(|e| ProxyError::Proxy(e.to_string()))?;

        let flusher = self.spawn_report_flusher();

        let result = proxy
            .start()
            .await
            .map_err(|e| ProxyError::Proxy(e.to_string()));

        if let Some(flusher) = flusher {
            flusher.abort();
        }
        if let Err(e) = self.flush_report() {
            tracing::error!("Final report flush failed: {}", e);
        }

        result?;
        tracing::info!("Proxy server stopped");
        Ok(())
    }

    /// Starts the proxy server in the background.
    ///
    /// Returns a handle that can be used to stop the server.
    pub fn start(self) -> ProxyHandle {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut shutdown_rx = shutdown_tx.subscribe();
        let addr = self.config.addr;

        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
                tracing::info!("Proxy shutdown signal received");
            };
            if let Err(e) = self.serve(shutdown).await {
                tracing::error!("Proxy error: {}", e);
            }
        });

        ProxyHandle {
            shutdown_tx,
            addr,
            handle,
        }
    }

    /// Spawns the periodic report writer, if one is configured.
    fn spawn_report_flusher(&self) -> Option<tokio::task::JoinHandle<()>> {
        let tally = self.core.tally()?.clone();
        let path = self.config.content_type_report.clone()?;
        let interval = self.config.report_flush_interval?;

        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = flush(&tally, &path) {
                    tracing::warn!("Periodic report flush failed: {}", e);
                }
            }
        }))
    }
}

fn flush(tally: &ContentTypeTally, path: &Path) -> Result<ContentTypeReport> {
    let report = tally.flush(path)?;
    tracing::info!(
        "Wrote content-type report to {:?} ({} types, {} responses)",
        path,
        report.rows().len(),
        report.total()
    );
    Ok(report)
}

/// Handle for controlling a running proxy server.
pub struct ProxyHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl ProxyHandle {
    /// Returns the address the proxy is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the proxy to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the proxy to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down the proxy and waits for it to finish.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> ProxyConfig {
        ProxyConfig::new()
            .with_port(0)
            .with_cache_dir(temp_dir.path().join("cache"))
    }

    #[test]
    fn proxy_config_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.addr.port(), DEFAULT_PROXY_PORT);
        assert_eq!(config.cache_dir, PathBuf::from(".cache"));
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert!(config.inject_fragment.is_none());
        assert!(config.content_type_report.is_none());
        assert!(config.policy.read_from_cache);
        assert!(config.policy.save_to_cache);
    }

    #[test]
    fn proxy_config_with_port() {
        let config = ProxyConfig::new().with_port(8888);
        assert_eq!(config.addr.port(), 8888);
    }

    #[test]
    fn proxy_config_with_addr() {
        let addr = SocketAddr::from(([0, 0, 0, 0], 9999));
        let config = ProxyConfig::new().with_addr(addr);
        assert_eq!(config.addr, addr);
    }

    #[test]
    fn proxy_server_new_creates_cache_dir() {
        let temp_dir = TempDir::new().unwrap();
        let server = ProxyServer::new(test_config(&temp_dir)).unwrap();
        assert!(temp_dir.path().join("cache").is_dir());
        assert!(server.tally().is_none());
    }

    #[test]
    fn proxy_server_new_fails_on_unusable_cache_dir() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let config = test_config(&temp_dir).with_cache_dir(blocker.join("cache"));
        assert!(matches!(
            ProxyServer::new(config),
            Err(ProxyError::Storage(_))
        ));
    }

    #[test]
    fn proxy_server_rejects_bad_upstream() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir).with_upstream_proxy("not a url");
        assert!(matches!(ProxyServer::new(config), Err(ProxyError::Fetch(_))));
    }

    #[test]
    fn flush_report_disabled_without_path() {
        let temp_dir = TempDir::new().unwrap();
        let server = ProxyServer::new(test_config(&temp_dir)).unwrap();
        assert!(server.flush_report().unwrap().is_none());
    }

    #[test]
    fn flush_report_writes_csv() {
        let temp_dir = TempDir::new().unwrap();
        let report_path = temp_dir.path().join("content-type.csv");
        let config = test_config(&temp_dir).with_content_type_report(&report_path);
        let server = ProxyServer::new(config).unwrap();

        let tally = server.tally().unwrap();
        tally.classify(Some("text/html; charset=utf-8"));
        tally.classify(Some("image/png"));
        tally.classify(Some("text/html"));

        let report = server.flush_report().unwrap().unwrap();
        assert_eq!(report.total(), 3);
        assert_eq!(
            std::fs::read_to_string(&report_path).unwrap(),
            "text/html,2\nimage/png,1\n"
        );
    }

    #[tokio::test]
    async fn proxy_handle_shutdown_flushes_report() {
        let temp_dir = TempDir::new().unwrap();
        let report_path = temp_dir.path().join("content-type.csv");
        let config = test_config(&temp_dir)
            .with_content_type_report(&report_path)
            .with_report_flush_interval(Duration::from_millis(20));
        let server = ProxyServer::new(config).unwrap();
        server.tally().unwrap().classify(Some("text/css"));

        let handle = server.start();

        // Give it a moment to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.stop().await;
        assert_eq!(
            std::fs::read_to_string(&report_path).unwrap(),
            "text/css,1\n"
        );
    }
}
