//! Host-aware sampling in front of a traffic store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use omniproxy_capture::Record;

use crate::error::Result;
use crate::store::TrafficStore;

/// Sampling configuration.
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Fraction of records to keep (0.0 to 1.0).
    pub sample_rate: f64,
    /// Hosts captured regardless of the rate. `*.suffix` matches
    /// subdomains.
    pub always_capture: Vec<String>,
    /// Hosts never captured.
    pub never_capture: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1.0,
            always_capture: Vec::new(),
            never_capture: Vec::new(),
        }
    }
}

/// Deterministic modulo sampler for high-volume deployments. Host lists
/// are consulted before the rate.
pub struct SamplingStore {
    inner: Arc<dyn TrafficStore>,
    config: SamplingConfig,
    counter: AtomicU64,
}

impl SamplingStore {
    pub fn new(inner: Arc<dyn TrafficStore>, config: SamplingConfig) -> Self {
        Self {
            inner,
            config,
            counter: AtomicU64::new(0),
        }
    }

    fn should_sample(&self) -> bool {
        if self.config.sample_rate >= 1.0 {
            return true;
        }
        if self.config.sample_rate <= 0.0 {
            return false;
        }
        let count = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let stride = (1.0 / self.config.sample_rate) as u64;
        count % stride.max(1) == 0
    }

    fn decision(&self, host: &str) -> Decision {
        if self
            .config
            .never_capture
            .iter()
            .any(|p| match_host(host, p))
        {
            return Decision::Drop;
        }
        if self
            .config
            .always_capture
            .iter()
            .any(|p| match_host(host, p))
        {
            return Decision::Keep;
        }
        if self.should_sample() {
            Decision::Keep
        } else {
            Decision::Drop
        }
    }
}

enum Decision {
    Keep,
    Drop,
}

#[async_trait]
impl TrafficStore for SamplingStore {
    async fn store(&self, rec: &Record) -> Result<()> {
        match self.decision(&rec.request.host) {
            Decision::Keep => self.inner.store(rec).await,
            Decision::Drop => Ok(()),
        }
    }

    async fn store_batch(&self, recs: &[Record]) -> Result<()> {
        for rec in recs {
            self.store(rec).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

/// `*.suffix` (or `*suffix`) matches by suffix, anything else exactly.
fn match_host(host: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if let Some(mut suffix) = pattern.strip_prefix('*') {
        suffix = suffix.strip_prefix('.').unwrap_or(suffix);
        return host.len() >= suffix.len() && host.ends_with(suffix);
    }
    host == pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniproxy_capture::RequestRecord;
    use std::sync::atomic::AtomicUsize;

    fn rec(host: &str) -> Record {
        Record::started(RequestRecord {
            host: host.into(),
            method: "GET".into(),
            path: "/".into(),
            ..RequestRecord::default()
        })
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl TrafficStore for Counting {
        async fn store(&self, _rec: &Record) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn store_batch(&self, recs: &[Record]) -> Result<()> {
            self.0.fetch_add(recs.len(), Ordering::SeqCst);
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn full_rate_keeps_everything() {
        let inner = Arc::new(Counting(AtomicUsize::new(0)));
        let store = SamplingStore::new(inner.clone(), SamplingConfig::default());

        for _ in 0..10 {
            store.store(&rec("h.test")).await.unwrap();
        }
        assert_eq!(inner.0.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn half_rate_keeps_half() {
        let inner = Arc::new(Counting(AtomicUsize::new(0)));
        let store = SamplingStore::new(
            inner.clone(),
            SamplingConfig {
                sample_rate: 0.5,
                ..SamplingConfig::default()
            },
        );

        for _ in 0..100 {
            store.store(&rec("h.test")).await.unwrap();
        }
        assert_eq!(inner.0.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn never_capture_wins_over_always() {
        let inner = Arc::new(Counting(AtomicUsize::new(0)));
        let store = SamplingStore::new(
            inner.clone(),
            SamplingConfig {
                sample_rate: 1.0,
                always_capture: vec!["*.internal.test".into()],
                never_capture: vec!["secret.internal.test".into()],
            },
        );

        store.store(&rec("secret.internal.test")).await.unwrap();
        store.store(&rec("app.internal.test")).await.unwrap();
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_capture_overrides_rate() {
        let inner = Arc::new(Counting(AtomicUsize::new(0)));
        let store = SamplingStore::new(
            inner.clone(),
            SamplingConfig {
                sample_rate: 0.0,
                always_capture: vec!["keep.test".into()],
                never_capture: Vec::new(),
            },
        );

        store.store(&rec("keep.test")).await.unwrap();
        store.store(&rec("drop.test")).await.unwrap();
        assert_eq!(inner.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn host_pattern_matching() {
        assert!(match_host("a.example.com", "*.example.com"));
        assert!(match_host("example.com", "example.com"));
        assert!(!match_host("example.org", "example.com"));
        assert!(!match_host("example.com", ""));
    }
}
