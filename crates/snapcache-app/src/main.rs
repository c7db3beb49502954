//! Snapcache - forward HTTP caching proxy.
//!
//! Point a browser's HTTP proxy setting at the listen address. Every plain
//! HTTP response is stored under the cache directory on first sight and
//! replayed from there afterwards.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use directories::ProjectDirs;
use snapcache_proxy::{
    CachePolicy, ProxyConfig, ProxyServer, DEFAULT_CACHE_DIR, DEFAULT_PROXY_PORT,
    DEFAULT_REPORT_FILE,
};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Snapcache - forward HTTP caching proxy
#[derive(Parser, Debug)]
#[command(name = "snapcache", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PROXY_PORT)]
    port: u16,

    /// Directory holding cached responses
    #[arg(long, default_value = DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    /// Markup inserted after the opening <head> tag of HTML responses
    #[arg(long, conflicts_with = "inject_file")]
    inject: Option<String>,

    /// Read the injected markup from a file
    #[arg(long)]
    inject_file: Option<PathBuf>,

    /// Count responses per content type and write a CSV report
    #[arg(long)]
    content_type_report: bool,

    /// Path of the content-type report
    #[arg(long, default_value = DEFAULT_REPORT_FILE)]
    report_file: PathBuf,

    /// Rewrite the report every N seconds while running
    #[arg(long)]
    report_interval_secs: Option<u64>,

    /// Send origin requests through this HTTP proxy (e.g. http://127.0.0.1:1235)
    #[arg(long)]
    upstream_proxy: Option<String>,

    /// Timeout for each outbound fetch, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Never serve from the cache; always refetch
    #[arg(long)]
    no_read_cache: bool,

    /// Never write to the cache
    #[arg(long)]
    no_save_cache: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to daily-rotated files
    #[arg(long)]
    log_file: bool,

    /// Directory for log files (defaults to the user data directory)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

/// Get the logs directory path.
fn logs_dir(args: &Args) -> Option<PathBuf> {
    args.log_dir.clone().or_else(|| {
        ProjectDirs::from("", "snapcache", "Snapcache").map(|dirs| dirs.data_dir().join("logs"))
    })
}

/// Initialize console logging, plus file rotation when requested.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("snapcache={},warn", log_level)));

    if args.log_file {
        if let Some(log_dir) = logs_dir(args) {
            if std::fs::create_dir_all(&log_dir).is_ok() {
                let file_appender = RollingFileAppender::builder()
                    .rotation(Rotation::DAILY)
                    .max_log_files(5)
                    .filename_prefix("snapcache")
                    .filename_suffix("log")
                    .build(&log_dir)
                    .ok();

                if let Some(appender) = file_appender {
                    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(fmt::layer().with_writer(std::io::stdout))
                        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                        .init();

                    tracing::info!("Logging to {:?}", log_dir);
                    return Some(guard);
                }
            }
        }

        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        tracing::warn!("File logging unavailable, using console only");
        return None;
    }

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    None
}

/// Maps command-line arguments onto the proxy configuration.
fn proxy_config(args: &Args) -> anyhow::Result<ProxyConfig> {
    let mut config = ProxyConfig::new()
        .with_addr(SocketAddr::new(args.host, args.port))
        .with_cache_dir(&args.cache_dir)
        .with_fetch_timeout(Duration::from_secs(args.timeout_secs))
        .with_policy(CachePolicy {
            read_from_cache: !args.no_read_cache,
            save_to_cache: !args.no_save_cache,
        });

    if let Some(fragment) = &args.inject {
        config = config.with_inject_fragment(fragment.clone());
    }
    if let Some(path) = &args.inject_file {
        let fragment = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read inject file {:?}", path))?;
        config = config.with_inject_fragment(fragment);
    }

    if args.content_type_report {
        config = config.with_content_type_report(&args.report_file);
        if let Some(secs) = args.report_interval_secs {
            config = config.with_report_flush_interval(Duration::from_secs(secs.max(1)));
        }
    }

    if let Some(upstream) = &args.upstream_proxy {
        config = config.with_upstream_proxy(upstream.clone());
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args);

    tracing::info!("Snapcache v{} starting", env!("CARGO_PKG_VERSION"));

    let config = proxy_config(&args)?;
    if !config.policy.read_from_cache {
        tracing::info!("Cache reads disabled; every request goes to the origin");
    }
    if !config.policy.save_to_cache {
        tracing::info!("Cache writes disabled; nothing will be stored");
    }

    let server = ProxyServer::new(config).context("Failed to initialize proxy")?;
    server.run().await.context("Proxy server failed")?;

    Ok(())
}
