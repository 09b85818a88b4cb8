//! OmniProxy - intercepting HTTP/HTTPS forward proxy with traffic capture.
//!
//! Wires the pieces together: CA, leaf cache, proxy engine, capturer,
//! async storage, and the query API server.

mod config;
mod control;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use omniproxy_capture::{CaptureConfig, Capturer, Filter, FilterConfig, OutputFormat};
use omniproxy_observability::{HealthChecker, Metrics};
use omniproxy_proxy::{
    default_cert_path, default_key_path, Ca, CaConfig, CertCache, LruCertCache, ProxyConfig,
    ProxyEngine, TtlCertCache, TtlCertCacheConfig,
};
use omniproxy_server::{AppState, Server, ServerConfig};
use omniproxy_storage::{
    AsyncStoreConfig, AsyncTrafficStore, DatabaseStoreConfig, DatabaseTrafficStore, FileFormat,
    FileTrafficStore, TrafficQuerier, TrafficStore,
};

use config::{AppConfig, CertCacheKind};

/// How long shutdown waits for queued records to drain.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "omniproxy", version, about = "Intercepting HTTP/HTTPS proxy with traffic capture")]
struct Args {
    /// Config file path (default: ~/.omniproxy/config.yaml).
    #[arg(long, env = "OMNIPROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Proxy listen address, overrides the config file.
    #[arg(long, env = "OMNIPROXY_LISTEN")]
    listen: Option<std::net::SocketAddr>,

    /// Store URL (sqlite://..., postgres://...), overrides the config file.
    #[arg(long, env = "OMNIPROXY_STORE_URL")]
    store_url: Option<String>,

    /// Capture output file, overrides the config file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Disable HTTPS interception (tunnel every CONNECT).
    #[arg(long)]
    no_mitm: bool,

    /// Verbose per-request logging.
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut cfg = AppConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        cfg.listen = listen;
    }
    if let Some(url) = args.store_url.clone() {
        cfg.store.url = Some(url);
    }
    if let Some(output) = args.output.clone() {
        cfg.store.file = Some(output);
    }
    if args.no_mitm {
        cfg.mitm = false;
    }
    if args.verbose {
        cfg.verbose = true;
    }

    init_tracing(cfg.verbose);
    omniproxy_proxy::install_default_crypto_provider();
    info!("starting OmniProxy");

    let metrics = Arc::new(Metrics::new());
    let health = Arc::new(HealthChecker::new());

    // Capture pipeline: capturer -> async wrapper -> store.
    let capturer = Arc::new(build_capturer(&cfg)?);
    let (async_store, querier) = build_store(&cfg, &metrics).await?;

    if let Some(store) = &async_store {
        capturer.add_sink(Arc::clone(store) as Arc<dyn omniproxy_capture::RecordSink>);
        let depth_store = Arc::clone(store);
        metrics.set_queue_depth_callback(move || depth_store.queue_depth() as i64);
    }

    // Certificate authority and leaf cache.
    let ca = Ca::load_or_create(default_cert_path(), default_key_path(), &CaConfig::default())?;
    info!(cert = %default_cert_path().display(), "CA ready");

    let cert_cache: Arc<dyn CertCache> = match cfg.cert_cache.kind {
        CertCacheKind::Ttl => Arc::new(TtlCertCache::with_metrics(
            TtlCertCacheConfig {
                ttl: Duration::from_secs(cfg.cert_cache.ttl_secs),
                cleanup_interval: Duration::from_secs(cfg.cert_cache.cleanup_secs),
            },
            Some(Arc::clone(&metrics)),
        )),
        CertCacheKind::Lru => Arc::new(LruCertCache::with_metrics(
            cfg.cert_cache.capacity,
            Some(Arc::clone(&metrics)),
        )),
    };

    // The engine.
    let engine = ProxyEngine::new(
        ProxyConfig {
            listen: cfg.listen,
            mitm_enabled: cfg.mitm,
            skip_hosts: cfg.skip_hosts.clone(),
            upstream: cfg.upstream.clone(),
        },
        ca,
        cert_cache,
    )?
    .with_capturer(Arc::clone(&capturer))
    .with_metrics(Arc::clone(&metrics));

    let proxy_handle = engine.start().await?;
    info!(addr = %proxy_handle.addr(), "proxy running");

    // Query API server, when a queryable store exists.
    let querier_for_control = querier.clone();
    if cfg.api_enabled {
        if let Some(querier) = querier {
            let state = AppState::with_observability(
                querier,
                Arc::clone(&metrics),
                Arc::clone(&health),
            );
            let server_config = ServerConfig {
                host: cfg.api_listen.ip().to_string(),
                port: cfg.api_listen.port(),
            };
            match Server::new(server_config, state) {
                Ok(server) => {
                    tokio::spawn(async move {
                        if let Err(e) = server.run().await {
                            error!("api server error: {e}");
                        }
                    });
                }
                Err(e) => error!("failed to create api server: {e}"),
            }
        }
    }

    // Control surface; a transport layer (unix socket, TCP) binds to this.
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let _control: Arc<dyn control::ControlService> = Arc::new(control::AppControl {
        engine: engine.clone(),
        capturer: Arc::clone(&capturer),
        querier: querier_for_control,
        metrics: Arc::clone(&metrics),
        listen: proxy_handle.addr(),
        started_at: std::time::Instant::now(),
        shutdown_tx: shutdown_tx.clone(),
    });
    health.set_ready(true);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        _ = shutdown_rx.recv() => {
            info!("stop requested, shutting down");
        }
    }

    health.set_ready(false);
    proxy_handle.stop().await;

    if let Some(store) = &async_store {
        if let Err(e) = store.flush(SHUTDOWN_FLUSH_TIMEOUT).await {
            warn!("flush incomplete, queued records dropped: {e}");
        }
        if let Err(e) = store.close().await {
            warn!("store close failed: {e}");
        }
    }
    if let Err(e) = capturer.close() {
        warn!("capture output close failed: {e}");
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "omniproxy=debug" } else { "omniproxy=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

fn build_capturer(cfg: &AppConfig) -> anyhow::Result<Capturer> {
    let mut capture_config = CaptureConfig {
        format: cfg.store.format,
        skip_binary: cfg.capture.skip_binary,
        max_body_size: cfg.capture.max_body_size,
        ..CaptureConfig::default()
    };
    capture_config
        .redact_headers
        .extend(cfg.capture.redact_headers.iter().cloned());

    let mut capturer = Capturer::new(capture_config);

    // HAR needs the capturer's own buffered writer; line formats are
    // handled by the file store instead.
    if cfg.store.format == OutputFormat::Har {
        if let Some(path) = &cfg.store.file {
            let file = std::fs::File::create(path)?;
            capturer = capturer.with_output(Box::new(file));
        }
    }

    if cfg.capture.has_filter() {
        capturer.set_filter(Some(build_filter(cfg)?));
    }

    Ok(capturer)
}

fn build_filter(cfg: &AppConfig) -> anyhow::Result<Filter> {
    let filter = FilterConfig {
        include_hosts: cfg.capture.include_hosts.clone(),
        exclude_hosts: cfg.capture.exclude_hosts.clone(),
        include_paths: cfg.capture.include_paths.clone(),
        exclude_paths: cfg.capture.exclude_paths.clone(),
        include_methods: cfg.capture.include_methods.clone(),
        exclude_methods: cfg.capture.exclude_methods.clone(),
        ..FilterConfig::new()
    }
    .compile()?;
    Ok(filter)
}

/// Builds the storage pipeline. Returns the async wrapper plus the query
/// handle when the backend supports reads.
async fn build_store(
    cfg: &AppConfig,
    metrics: &Arc<Metrics>,
) -> anyhow::Result<(Option<Arc<AsyncTrafficStore>>, Option<Arc<dyn TrafficQuerier>>)> {
    let async_config = AsyncStoreConfig {
        queue_size: cfg.store.queue_size,
        batch_size: cfg.store.batch_size,
        flush_period: cfg.store.flush_period(),
        workers: cfg.store.workers,
        metrics: Some(Arc::clone(metrics)),
    };

    if let Some(url) = &cfg.store.url {
        let db = Arc::new(
            DatabaseTrafficStore::open(DatabaseStoreConfig {
                url: url.clone(),
                proxy_name: "default".to_string(),
                metrics: Some(Arc::clone(metrics)),
            })
            .await?,
        );
        let querier: Arc<dyn TrafficQuerier> = Arc::clone(&db) as Arc<dyn TrafficQuerier>;
        let inner: Arc<dyn TrafficStore> = db;
        let wrapped = Arc::new(AsyncTrafficStore::new(inner, async_config));
        return Ok((Some(wrapped), Some(querier)));
    }

    if let Some(path) = &cfg.store.file {
        // HAR output is written by the capturer itself.
        if cfg.store.format == OutputFormat::Har {
            return Ok((None, None));
        }
        let format = match cfg.store.format {
            OutputFormat::Json => FileFormat::Json,
            _ => FileFormat::Ndjson,
        };
        let file = FileTrafficStore::open(path, format)?.with_metrics(Arc::clone(metrics));
        let inner: Arc<dyn TrafficStore> = Arc::new(file);
        let wrapped = Arc::new(AsyncTrafficStore::new(inner, async_config));
        return Ok((Some(wrapped), None));
    }

    Ok((None, None))
}
