//! The metrics registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

/// Bucket boundaries for request duration in milliseconds.
const DURATION_BUCKETS_MS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// Bucket boundaries for response size in bytes.
const SIZE_BUCKETS_BYTES: &[f64] = &[
    100.0, 1000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0,
];

/// A fixed-bucket histogram.
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum: RwLock<f64>,
}

impl Histogram {
    fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            buckets: (0..bounds.len() + 1).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum: RwLock::new(0.0),
        }
    }

    /// Records an observation into the first bucket whose bound contains it.
    pub fn observe(&self, value: f64) {
        let idx = self
            .bounds
            .iter()
            .position(|&b| value <= b)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        *self.sum.write() += value;
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self
                .bounds
                .iter()
                .enumerate()
                .map(|(i, &b)| (b, self.buckets[i].load(Ordering::Relaxed)))
                .collect(),
            overflow: self.buckets[self.bounds.len()].load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            sum: *self.sum.read(),
        }
    }
}

/// Serialized view of a histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    /// (upper bound, count) pairs.
    pub buckets: Vec<(f64, u64)>,
    /// Observations above the largest bound.
    pub overflow: u64,
    pub count: u64,
    pub sum: f64,
}

#[derive(Debug, Default)]
struct RequestKeyCounters {
    by_method: RwLock<BTreeMap<String, u64>>,
    by_status: RwLock<BTreeMap<u16, u64>>,
    by_status_class: RwLock<BTreeMap<String, u64>>,
    by_host: RwLock<BTreeMap<String, u64>>,
}

/// All OmniProxy metrics.
pub struct Metrics {
    requests_total: AtomicU64,
    request_labels: RequestKeyCounters,
    request_duration_ms: Histogram,
    response_size_bytes: Histogram,

    certs_generated: AtomicU64,
    cert_cache_hits: AtomicU64,
    cert_cache_misses: AtomicU64,

    traffic_stored: AtomicU64,
    traffic_store_errors: AtomicU64,

    active_requests: AtomicI64,
    active_connections: AtomicI64,

    /// Observed on snapshot, like an observable gauge.
    queue_depth_fn: RwLock<Option<Box<dyn Fn() -> i64 + Send + Sync>>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            request_labels: RequestKeyCounters::default(),
            request_duration_ms: Histogram::new(DURATION_BUCKETS_MS),
            response_size_bytes: Histogram::new(SIZE_BUCKETS_BYTES),
            certs_generated: AtomicU64::new(0),
            cert_cache_hits: AtomicU64::new(0),
            cert_cache_misses: AtomicU64::new(0),
            traffic_stored: AtomicU64::new(0),
            traffic_store_errors: AtomicU64::new(0),
            active_requests: AtomicI64::new(0),
            active_connections: AtomicI64::new(0),
            queue_depth_fn: RwLock::new(None),
        }
    }

    /// Records a completed request.
    pub fn record_request(
        &self,
        method: &str,
        host: &str,
        status: u16,
        duration_ms: f64,
        response_size: i64,
    ) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        *self
            .request_labels
            .by_method
            .write()
            .entry(method.to_string())
            .or_insert(0) += 1;
        *self.request_labels.by_status.write().entry(status).or_insert(0) += 1;
        *self
            .request_labels
            .by_status_class
            .write()
            .entry(status_class(status).to_string())
            .or_insert(0) += 1;
        *self
            .request_labels
            .by_host
            .write()
            .entry(host.to_string())
            .or_insert(0) += 1;

        self.request_duration_ms.observe(duration_ms);
        if response_size > 0 {
            self.response_size_bytes.observe(response_size as f64);
        }
    }

    pub fn request_start(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_end(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_cert_generated(&self) {
        self.certs_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cert_cache_hit(&self) {
        self.cert_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cert_cache_miss(&self) {
        self.cert_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_traffic_stored(&self) {
        self.traffic_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_traffic_store_error(&self) {
        self.traffic_store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn traffic_store_errors(&self) -> u64 {
        self.traffic_store_errors.load(Ordering::Relaxed)
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Registers the queue-depth callback, read on every snapshot.
    pub fn set_queue_depth_callback<F>(&self, f: F)
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        *self.queue_depth_fn.write() = Some(Box::new(f));
    }

    /// Captures a point-in-time view of every instrument.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let queue_depth = self.queue_depth_fn.read().as_ref().map(|f| f());

        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_by_method: self.request_labels.by_method.read().clone(),
            requests_by_status: self.request_labels.by_status.read().clone(),
            requests_by_status_class: self.request_labels.by_status_class.read().clone(),
            requests_by_host: self.request_labels.by_host.read().clone(),
            request_duration_ms: self.request_duration_ms.snapshot(),
            response_size_bytes: self.response_size_bytes.snapshot(),
            certs_generated: self.certs_generated.load(Ordering::Relaxed),
            cert_cache_hits: self.cert_cache_hits.load(Ordering::Relaxed),
            cert_cache_misses: self.cert_cache_misses.load(Ordering::Relaxed),
            traffic_stored: self.traffic_stored.load(Ordering::Relaxed),
            traffic_store_errors: self.traffic_store_errors.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            traffic_queue_depth: queue_depth,
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("requests_total", &self.requests_total())
            .finish_non_exhaustive()
    }
}

/// JSON-serializable snapshot served on `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_by_method: BTreeMap<String, u64>,
    pub requests_by_status: BTreeMap<u16, u64>,
    pub requests_by_status_class: BTreeMap<String, u64>,
    pub requests_by_host: BTreeMap<String, u64>,
    pub request_duration_ms: HistogramSnapshot,
    pub response_size_bytes: HistogramSnapshot,
    pub certs_generated: u64,
    pub cert_cache_hits: u64,
    pub cert_cache_misses: u64,
    pub traffic_stored: u64,
    pub traffic_store_errors: u64,
    pub active_requests: i64,
    pub active_connections: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_queue_depth: Option<i64>,
}

/// The status class for a code (1xx..5xx).
fn status_class(code: u16) -> &'static str {
    match code {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_request_updates_labels() {
        let m = Metrics::new();
        m.record_request("GET", "a.test", 200, 12.0, 512);
        m.record_request("GET", "a.test", 404, 3.0, 64);
        m.record_request("POST", "b.test", 500, 700.0, 0);

        let snap = m.snapshot();
        assert_eq!(snap.requests_total, 3);
        assert_eq!(snap.requests_by_method["GET"], 2);
        assert_eq!(snap.requests_by_method["POST"], 1);
        assert_eq!(snap.requests_by_status[&404], 1);
        assert_eq!(snap.requests_by_status_class["2xx"], 1);
        assert_eq!(snap.requests_by_status_class["5xx"], 1);
        assert_eq!(snap.requests_by_host["a.test"], 2);
        // Zero-sized responses are not observed.
        assert_eq!(snap.response_size_bytes.count, 2);
    }

    #[test]
    fn histogram_buckets() {
        let h = Histogram::new(DURATION_BUCKETS_MS);
        h.observe(0.5);
        h.observe(7.0);
        h.observe(99999.0);

        let snap = h.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.buckets[0], (1.0, 1)); // 0.5 <= 1
        assert_eq!(snap.buckets[2], (10.0, 1)); // 7 <= 10
        assert_eq!(snap.overflow, 1); // 99999 beyond the last bound
        assert!((snap.sum - 100006.5).abs() < 1e-6);
    }

    #[test]
    fn up_down_counters() {
        let m = Metrics::new();
        m.request_start();
        m.request_start();
        m.request_end();
        m.connection_opened();

        let snap = m.snapshot();
        assert_eq!(snap.active_requests, 1);
        assert_eq!(snap.active_connections, 1);
    }

    #[test]
    fn queue_depth_callback_observed_on_snapshot() {
        let m = Metrics::new();
        assert!(m.snapshot().traffic_queue_depth.is_none());

        m.set_queue_depth_callback(|| 42);
        assert_eq!(m.snapshot().traffic_queue_depth, Some(42));
    }

    #[test]
    fn status_classes() {
        assert_eq!(status_class(101), "1xx");
        assert_eq!(status_class(204), "2xx");
        assert_eq!(status_class(302), "3xx");
        assert_eq!(status_class(404), "4xx");
        assert_eq!(status_class(503), "5xx");
        assert_eq!(status_class(700), "unknown");
    }

    #[test]
    fn snapshot_serializes() {
        let m = Metrics::new();
        m.record_request("GET", "h", 200, 1.0, 10);
        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(json["requests_total"], 1);
        assert!(json["request_duration_ms"]["buckets"].is_array());
    }
}
