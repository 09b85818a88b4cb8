//! Leaf certificate caches.
//!
//! Two interchangeable variants share the [`CertCache`] contract: a TTL
//! cache with a background sweep, and a fixed-capacity LRU. Both are safe
//! under concurrent callers and count hits and misses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;

use omniproxy_observability::Metrics;

use crate::error::Result;

/// A minted leaf: certificate chain ([leaf, root]) plus private key.
pub struct LeafCert {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl LeafCert {
    pub fn new(chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { chain, key }
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Builds a rustls server config presenting this leaf, with HTTP/1.1
    /// ALPN.
    pub fn server_config(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.chain.clone(), self.key.clone_key())?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }
}

impl std::fmt::Debug for LeafCert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeafCert")
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// Host-to-leaf cache contract. Implementations are concurrency-safe.
pub trait CertCache: Send + Sync {
    /// Returns the cached leaf for the host, if present (and not expired).
    fn get(&self, host: &str) -> Option<Arc<LeafCert>>;

    /// Stores a leaf for the host.
    fn set(&self, host: &str, cert: Arc<LeafCert>);

    /// Removes a single host.
    fn delete(&self, host: &str);

    /// Removes all entries.
    fn clear(&self);

    /// Number of cached entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// TTL cache configuration.
#[derive(Debug, Clone)]
pub struct TtlCertCacheConfig {
    /// How long entries stay valid (default 1 hour).
    pub ttl: Duration,
    /// How often the background sweep purges expired entries
    /// (default 5 minutes).
    pub cleanup_interval: Duration,
}

impl Default for TtlCertCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

struct TtlEntry {
    cert: Arc<LeafCert>,
    expires_at: Instant,
}

struct TtlShared {
    entries: RwLock<HashMap<String, TtlEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

/// TTL-evicting leaf cache with a background sweep task.
pub struct TtlCertCache {
    shared: Arc<TtlShared>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TtlCertCache {
    /// Creates the cache and starts its sweep task. Must be called inside a
    /// tokio runtime.
    pub fn new(config: TtlCertCacheConfig) -> Self {
        Self::with_metrics(config, None)
    }

    pub fn with_metrics(config: TtlCertCacheConfig, metrics: Option<Arc<Metrics>>) -> Self {
        let shared = Arc::new(TtlShared {
            entries: RwLock::new(HashMap::new()),
            ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            metrics,
        });

        let sweep = Arc::clone(&shared);
        let interval = config.cleanup_interval;
        let sweeper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let now = Instant::now();
                sweep.entries.write().retain(|_, e| e.expires_at > now);
            }
        });

        Self {
            shared,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Stops the sweep task. Called automatically on drop.
    pub fn close(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    pub fn hits(&self) -> u64 {
        self.shared.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.shared.misses.load(Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.shared.hits.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.shared.metrics {
            m.record_cert_cache_hit();
        }
    }

    fn record_miss(&self) {
        self.shared.misses.fetch_add(1, Ordering::Relaxed);
        if let Some(m) = &self.shared.metrics {
            m.record_cert_cache_miss();
        }
    }
}

impl Drop for TtlCertCache {
    fn drop(&mut self) {
        self.close();
    }
}

impl CertCache for TtlCertCache {
    fn get(&self, host: &str) -> Option<Arc<LeafCert>> {
        let expired = {
            let entries = self.shared.entries.read();
            match entries.get(host) {
                Some(e) if e.expires_at > Instant::now() => {
                    self.record_hit();
                    return Some(Arc::clone(&e.cert));
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            self.shared.entries.write().remove(host);
        }
        self.record_miss();
        None
    }

    fn set(&self, host: &str, cert: Arc<LeafCert>) {
        let entry = TtlEntry {
            cert,
            expires_at: Instant::now() + self.shared.ttl,
        };
        self.shared.entries.write().insert(host.to_string(), entry);
    }

    fn delete(&self, host: &str) {
        self.shared.entries.write().remove(host);
    }

    fn clear(&self) {
        self.shared.entries.write().clear();
    }

    fn len(&self) -> usize {
        self.shared.entries.read().len()
    }
}

struct LruEntry {
    cert: Arc<LeafCert>,
    last_used: u64,
}

struct LruInner {
    entries: HashMap<String, LruEntry>,
    tick: u64,
}

/// Fixed-capacity leaf cache evicting the least recently used host.
pub struct LruCertCache {
    inner: Mutex<LruInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

impl LruCertCache {
    /// Creates a cache holding at most `capacity` leaves (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self::with_metrics(capacity, None)
    }

    pub fn with_metrics(capacity: usize, metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                entries: HashMap::new(),
                tick: 0,
            }),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl CertCache for LruCertCache {
    fn get(&self, host: &str) -> Option<Arc<LeafCert>> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        match inner.entries.get_mut(host) {
            Some(entry) => {
                entry.last_used = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = &self.metrics {
                    m.record_cert_cache_hit();
                }
                Some(Arc::clone(&entry.cert))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = &self.metrics {
                    m.record_cert_cache_miss();
                }
                None
            }
        }
    }

    fn set(&self, host: &str, cert: Arc<LeafCert>) {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        inner
            .entries
            .insert(host.to_string(), LruEntry { cert, last_used: tick });

        if inner.entries.len() > self.capacity {
            // Evict the least recently used entry.
            if let Some(victim) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(host, _)| host.clone())
            {
                inner.entries.remove(&victim);
            }
        }
    }

    fn delete(&self, host: &str) {
        self.inner.lock().entries.remove(host);
    }

    fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_leaf() -> Arc<LeafCert> {
        let dir = tempfile::TempDir::new().unwrap();
        let ca = crate::ca::Ca::load_or_create(
            dir.path().join("c.crt"),
            dir.path().join("c.key"),
            &crate::ca::CaConfig::default(),
        )
        .unwrap();
        Arc::new(ca.mint_leaf_der("cache.test").unwrap())
    }

    #[tokio::test]
    async fn ttl_get_within_ttl_hits() {
        let cache = TtlCertCache::new(TtlCertCacheConfig {
            ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(300),
        });

        assert!(cache.get("h").is_none());
        assert_eq!(cache.misses(), 1);

        cache.set("h", dummy_leaf());
        assert!(cache.get("h").is_some());
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn ttl_expired_entry_is_removed_on_access() {
        let cache = TtlCertCache::new(TtlCertCacheConfig {
            ttl: Duration::from_millis(20),
            cleanup_interval: Duration::from_secs(300),
        });

        cache.set("h", dummy_leaf());
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache.get("h").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn ttl_background_sweep_purges() {
        let cache = TtlCertCache::new(TtlCertCacheConfig {
            ttl: Duration::from_millis(10),
            cleanup_interval: Duration::from_millis(30),
        });

        cache.set("a", dummy_leaf());
        cache.set("b", dummy_leaf());
        assert_eq!(cache.len(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn ttl_delete_and_clear() {
        let cache = TtlCertCache::new(TtlCertCacheConfig::default());
        cache.set("a", dummy_leaf());
        cache.set("b", dummy_leaf());

        cache.delete("a");
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let cache = LruCertCache::new(2);
        let leaf = dummy_leaf();

        cache.set("a", Arc::clone(&leaf));
        cache.set("b", Arc::clone(&leaf));

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());

        cache.set("c", Arc::clone(&leaf));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn lru_get_promotes() {
        let cache = LruCertCache::new(2);
        let leaf = dummy_leaf();

        cache.set("old", Arc::clone(&leaf));
        cache.set("newer", Arc::clone(&leaf));
        assert!(cache.get("old").is_some());
        cache.set("newest", Arc::clone(&leaf));

        // "newer" was least recently used after the promotion of "old".
        assert!(cache.get("newer").is_none());
        assert!(cache.get("old").is_some());
    }

    #[test]
    fn lru_counts_hits_and_misses() {
        let cache = LruCertCache::new(8);
        let leaf = dummy_leaf();

        cache.get("missing");
        cache.set("h", leaf);
        cache.get("h");
        cache.get("h");

        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 2);
    }

    #[test]
    fn lru_overwrite_does_not_grow() {
        let cache = LruCertCache::new(4);
        let leaf = dummy_leaf();
        cache.set("h", Arc::clone(&leaf));
        cache.set("h", leaf);
        assert_eq!(cache.len(), 1);
    }
}
