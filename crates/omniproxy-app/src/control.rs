//! Abstract control surface.
//!
//! A transport layer (unix socket, TCP, named pipe) binds to this trait to
//! expose runtime controls without the core depending on any IPC framing.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast;

use omniproxy_capture::{Capturer, Filter};
use omniproxy_observability::MetricsSnapshot;
use omniproxy_proxy::ProxyEngine;
use omniproxy_storage::{TrafficFilter, TrafficQuerier, TrafficStats, TrafficSummary};

/// Runtime status of the proxy.
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub running: bool,
    pub listen: String,
    pub uptime_secs: u64,
}

/// Controls a running OmniProxy instance.
#[async_trait]
pub trait ControlService: Send + Sync {
    /// Current process status.
    async fn status(&self) -> StatusInfo;

    /// Metrics snapshot.
    async fn metrics(&self) -> MetricsSnapshot;

    /// Aggregate traffic statistics, when a queryable store is configured.
    async fn stats(&self) -> Option<TrafficStats>;

    /// Query stored traffic, when a queryable store is configured.
    async fn query(&self, filter: TrafficFilter) -> Option<Vec<TrafficSummary>>;

    /// Atomically swaps the skip-host list and the capture filter
    /// (`None` removes the filter). Takes effect without a restart.
    async fn reload(&self, skip_hosts: Vec<String>, filter: Option<Filter>);

    /// Requests a clean shutdown.
    async fn stop(&self);
}

/// Control service wired to the running components.
pub struct AppControl {
    pub engine: ProxyEngine,
    pub capturer: Arc<Capturer>,
    pub querier: Option<Arc<dyn TrafficQuerier>>,
    pub metrics: Arc<omniproxy_observability::Metrics>,
    pub listen: std::net::SocketAddr,
    pub started_at: std::time::Instant,
    pub shutdown_tx: broadcast::Sender<()>,
}

#[async_trait]
impl ControlService for AppControl {
    async fn status(&self) -> StatusInfo {
        StatusInfo {
            running: true,
            listen: self.listen.to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }

    async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn stats(&self) -> Option<TrafficStats> {
        let querier = self.querier.as_ref()?;
        querier.stats(&TrafficFilter::default()).await.ok()
    }

    async fn query(&self, filter: TrafficFilter) -> Option<Vec<TrafficSummary>> {
        let querier = self.querier.as_ref()?;
        querier.query(&filter).await.ok()
    }

    async fn reload(&self, skip_hosts: Vec<String>, filter: Option<Filter>) {
        self.engine.reload_skip_hosts(skip_hosts);
        self.capturer.set_filter(filter);
    }

    async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniproxy_capture::{CaptureConfig, FilterConfig};
    use omniproxy_proxy::{Ca, CaConfig, LruCertCache, ProxyConfig};
    use tempfile::TempDir;

    fn test_engine(dir: &TempDir) -> ProxyEngine {
        omniproxy_proxy::install_default_crypto_provider();
        let ca = Ca::load_or_create(
            dir.path().join("ca.crt"),
            dir.path().join("ca.key"),
            &CaConfig::default(),
        )
        .unwrap();
        ProxyEngine::new(ProxyConfig::default(), ca, Arc::new(LruCertCache::new(4))).unwrap()
    }

    fn control(dir: &TempDir) -> (AppControl, broadcast::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let control = AppControl {
            engine: test_engine(dir),
            capturer: Arc::new(Capturer::new(CaptureConfig::default())),
            querier: None,
            metrics: Arc::new(omniproxy_observability::Metrics::new()),
            listen: "127.0.0.1:8080".parse().unwrap(),
            started_at: std::time::Instant::now(),
            shutdown_tx,
        };
        (control, shutdown_rx)
    }

    #[tokio::test]
    async fn status_reports_listen_address() {
        let dir = TempDir::new().unwrap();
        let (control, _rx) = control(&dir);

        let status = control.status().await;
        assert!(status.running);
        assert_eq!(status.listen, "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn stats_and_query_absent_without_querier() {
        let dir = TempDir::new().unwrap();
        let (control, _rx) = control(&dir);

        assert!(control.stats().await.is_none());
        assert!(control.query(TrafficFilter::default()).await.is_none());
    }

    #[tokio::test]
    async fn stop_signals_shutdown() {
        let dir = TempDir::new().unwrap();
        let (control, mut rx) = control(&dir);

        control.stop().await;
        assert!(rx.recv().await.is_ok());
    }

    #[tokio::test]
    async fn reload_swaps_skip_hosts_and_filter() {
        let dir = TempDir::new().unwrap();
        let (control, _rx) = control(&dir);
        assert!(!control.capturer.has_filter());

        let filter = FilterConfig {
            include_paths: vec!["/api/*".to_string()],
            ..FilterConfig::new()
        }
        .compile()
        .unwrap();
        control
            .reload(vec!["*.pinned.test".to_string()], Some(filter))
            .await;
        assert!(control.capturer.has_filter());

        // Reloading with no filter removes it.
        control.reload(Vec::new(), None).await;
        assert!(!control.capturer.has_filter());
    }
}
