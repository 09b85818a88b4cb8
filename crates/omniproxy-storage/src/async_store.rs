//! Non-blocking batched wrapper around a traffic store.
//!
//! `store` enqueues without blocking; when the bounded queue is full the
//! record is dropped and the error counter incremented. A fixed pool of
//! workers drains the queue in batches, flushing partial batches on a
//! timer. The proxy path never waits on persistence.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use omniproxy_capture::{Record, RecordSink};
use omniproxy_observability::Metrics;

use crate::error::{Result, StorageError};
use crate::store::TrafficStore;

/// Upper bound on a single batch write to the inner store.
const BATCH_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
/// Poll interval while waiting for the queue to drain.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Async wrapper configuration.
#[derive(Debug, Clone)]
pub struct AsyncStoreConfig {
    /// Bounded queue capacity (default 10 000).
    pub queue_size: usize,
    /// Records per batch write (default 100).
    pub batch_size: usize,
    /// Partial-batch flush period (default 100 ms).
    pub flush_period: Duration,
    /// Number of drain workers (default 2).
    pub workers: usize,
    pub metrics: Option<Arc<Metrics>>,
}

impl Default for AsyncStoreConfig {
    fn default() -> Self {
        Self {
            queue_size: 10_000,
            batch_size: 100,
            flush_period: Duration::from_millis(100),
            workers: 2,
            metrics: None,
        }
    }
}

struct Shared {
    inner: Arc<dyn TrafficStore>,
    batch_size: usize,
    flush_period: Duration,
    stored: AtomicU64,
    store_errors: AtomicU64,
    metrics: Option<Arc<Metrics>>,
}

/// Batched, non-blocking front for any [`TrafficStore`].
pub struct AsyncTrafficStore {
    tx: mpsc::Sender<Record>,
    shared: Arc<Shared>,
    closed: AtomicBool,
    stop_tx: broadcast::Sender<()>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl AsyncTrafficStore {
    /// Wraps the store and starts the worker pool. Must be called inside a
    /// tokio runtime.
    pub fn new(inner: Arc<dyn TrafficStore>, config: AsyncStoreConfig) -> Self {
        let queue_size = config.queue_size.max(1);
        let workers = config.workers.max(1);

        let (tx, rx) = mpsc::channel::<Record>(queue_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let (stop_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            inner,
            batch_size: config.batch_size.max(1),
            flush_period: config.flush_period,
            stored: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            metrics: config.metrics,
        });

        let handles = (0..workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                let rx = Arc::clone(&rx);
                let stop_rx = stop_tx.subscribe();
                tokio::spawn(async move {
                    worker(i, shared, rx, stop_rx).await;
                })
            })
            .collect();

        Self {
            tx,
            shared,
            closed: AtomicBool::new(false),
            stop_tx,
            workers: Mutex::new(handles),
        }
    }

    /// Non-blocking enqueue. When the queue is full the record is dropped
    /// and counted; the caller is never delayed.
    pub fn enqueue(&self, rec: Record) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }

        match self.tx.try_send(rec) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.store_errors.fetch_add(1, Ordering::Relaxed);
                if let Some(m) = &self.shared.metrics {
                    m.record_traffic_store_error();
                }
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(StorageError::Closed),
        }
    }

    /// Number of records waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Records successfully handed to the inner store.
    pub fn stored(&self) -> u64 {
        self.shared.stored.load(Ordering::Relaxed)
    }

    /// Records dropped or failed.
    pub fn store_errors(&self) -> u64 {
        self.shared.store_errors.load(Ordering::Relaxed)
    }

    /// Blocks until the queue is empty or the timeout elapses, polling
    /// every 10 ms.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.queue_depth() == 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StorageError::Timeout);
            }
            tokio::time::sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    async fn close_impl(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.stop_tx.send(());

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                debug!("async store worker join failed: {e}");
            }
        }

        self.shared.inner.close().await
    }
}

#[async_trait]
impl TrafficStore for AsyncTrafficStore {
    async fn store(&self, rec: &Record) -> Result<()> {
        self.enqueue(rec.clone())
    }

    async fn store_batch(&self, recs: &[Record]) -> Result<()> {
        for rec in recs {
            self.enqueue(rec.clone())?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_impl().await
    }
}

impl RecordSink for AsyncTrafficStore {
    fn handle(&self, rec: &Record) {
        let _ = self.enqueue(rec.clone());
    }
}

async fn worker(
    id: usize,
    shared: Arc<Shared>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Record>>>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut batch: Vec<Record> = Vec::with_capacity(shared.batch_size);
    let mut tick = tokio::time::interval(shared.flush_period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    enum Event {
        Record(Option<Record>),
        Flush,
        Stop,
    }

    loop {
        let event = {
            let mut rx = rx.lock().await;
            tokio::select! {
                rec = rx.recv() => Event::Record(rec),
                _ = tick.tick() => Event::Flush,
                _ = stop_rx.recv() => Event::Stop,
            }
        };

        match event {
            Event::Record(Some(rec)) => {
                batch.push(rec);
                if batch.len() >= shared.batch_size {
                    flush_batch(&shared, &mut batch).await;
                }
            }
            Event::Record(None) => {
                flush_batch(&shared, &mut batch).await;
                break;
            }
            Event::Flush => {
                flush_batch(&shared, &mut batch).await;
            }
            Event::Stop => {
                // Best-effort drain of whatever is still queued.
                loop {
                    let rec = rx.lock().await.try_recv();
                    match rec {
                        Ok(rec) => {
                            batch.push(rec);
                            if batch.len() >= shared.batch_size {
                                flush_batch(&shared, &mut batch).await;
                            }
                        }
                        Err(_) => break,
                    }
                }
                flush_batch(&shared, &mut batch).await;
                debug!(worker = id, "async store worker stopped");
                break;
            }
        }
    }
}

/// Writes the batch with a bounded timeout and one retry; a batch that
/// fails twice is dropped and counted per record.
async fn flush_batch(shared: &Shared, batch: &mut Vec<Record>) {
    if batch.is_empty() {
        return;
    }

    let mut ok = write_once(shared, batch).await;
    if !ok {
        ok = write_once(shared, batch).await;
    }

    if ok {
        shared.stored.fetch_add(batch.len() as u64, Ordering::Relaxed);
        if let Some(m) = &shared.metrics {
            for _ in 0..batch.len() {
                m.record_traffic_stored();
            }
        }
    } else {
        warn!(records = batch.len(), "dropping batch after failed writes");
        shared
            .store_errors
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        if let Some(m) = &shared.metrics {
            for _ in 0..batch.len() {
                m.record_traffic_store_error();
            }
        }
    }

    batch.clear();
}

async fn write_once(shared: &Shared, batch: &[Record]) -> bool {
    matches!(
        tokio::time::timeout(BATCH_WRITE_TIMEOUT, shared.inner.store_batch(batch)).await,
        Ok(Ok(()))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniproxy_capture::RequestRecord;
    use std::sync::atomic::AtomicUsize;

    fn rec() -> Record {
        Record::started(RequestRecord {
            method: "GET".into(),
            host: "h".into(),
            path: "/".into(),
            ..RequestRecord::default()
        })
    }

    /// Inner store that counts batches and can be made slow or failing.
    struct Probe {
        stored: AtomicUsize,
        batches: AtomicUsize,
        delay: Duration,
        fail: AtomicBool,
    }

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                stored: AtomicUsize::new(0),
                batches: AtomicUsize::new(0),
                delay: Duration::ZERO,
                fail: AtomicBool::new(false),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                stored: AtomicUsize::new(0),
                batches: AtomicUsize::new(0),
                delay,
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl TrafficStore for Probe {
        async fn store(&self, rec: &Record) -> Result<()> {
            self.store_batch(std::slice::from_ref(rec)).await
        }

        async fn store_batch(&self, recs: &[Record]) -> Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Config("probe failure".into()));
            }
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.stored.fetch_add(recs.len(), Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn records_reach_inner_store_in_batches() {
        let probe = Probe::new();
        let store = AsyncTrafficStore::new(
            probe.clone(),
            AsyncStoreConfig {
                batch_size: 10,
                flush_period: Duration::from_millis(20),
                workers: 2,
                ..AsyncStoreConfig::default()
            },
        );

        for _ in 0..25 {
            store.enqueue(rec()).unwrap();
        }

        store.flush(Duration::from_secs(2)).await.unwrap();
        // A partial batch may still be in a worker's hands briefly.
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(probe.stored.load(Ordering::SeqCst), 25);
        assert_eq!(store.stored(), 25);
        assert_eq!(store.store_errors(), 0);

        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        // One slow worker, tiny queue: overflow must drop, not block.
        let probe = Probe::slow(Duration::from_secs(5));
        let store = AsyncTrafficStore::new(
            probe,
            AsyncStoreConfig {
                queue_size: 2,
                batch_size: 1,
                flush_period: Duration::from_millis(5),
                workers: 1,
                ..AsyncStoreConfig::default()
            },
        );

        // Give the worker a moment to pull one record into its batch.
        let started = std::time::Instant::now();
        for _ in 0..100 {
            store.enqueue(rec()).unwrap();
        }
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "enqueue must never block"
        );
        assert!(store.store_errors() >= 90, "errors: {}", store.store_errors());
    }

    #[tokio::test]
    async fn store_after_close_is_an_error() {
        let probe = Probe::new();
        let store = AsyncTrafficStore::new(probe, AsyncStoreConfig::default());

        store.close().await.unwrap();
        store.close().await.unwrap(); // idempotent

        let err = store.enqueue(rec()).unwrap_err();
        assert!(matches!(err, StorageError::Closed));
    }

    #[tokio::test]
    async fn close_drains_remaining_records() {
        let probe = Probe::new();
        let store = AsyncTrafficStore::new(
            probe.clone(),
            AsyncStoreConfig {
                batch_size: 100,
                flush_period: Duration::from_secs(60), // no timer flush
                workers: 1,
                ..AsyncStoreConfig::default()
            },
        );

        for _ in 0..7 {
            store.enqueue(rec()).unwrap();
        }
        store.close().await.unwrap();

        assert_eq!(probe.stored.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn flush_times_out_when_queue_stays_full() {
        // A single worker stuck in a 30s write leaves the queue populated.
        let probe = Probe::slow(Duration::from_secs(30));
        let store = AsyncTrafficStore::new(
            probe,
            AsyncStoreConfig {
                queue_size: 8,
                batch_size: 1,
                flush_period: Duration::from_secs(60),
                workers: 1,
                ..AsyncStoreConfig::default()
            },
        );

        for _ in 0..8 {
            store.enqueue(rec()).unwrap();
        }

        let err = store.flush(Duration::from_millis(100)).await;
        assert!(matches!(err, Err(StorageError::Timeout)));
    }

    #[tokio::test]
    async fn failed_batches_are_counted_per_record() {
        let probe = Probe::new();
        probe.fail.store(true, Ordering::SeqCst);
        let store = AsyncTrafficStore::new(
            probe.clone(),
            AsyncStoreConfig {
                batch_size: 5,
                flush_period: Duration::from_millis(10),
                workers: 1,
                ..AsyncStoreConfig::default()
            },
        );

        for _ in 0..5 {
            store.enqueue(rec()).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.store_errors(), 5);
        assert_eq!(probe.stored.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn queue_depth_reflects_pending() {
        let probe = Probe::slow(Duration::from_secs(10));
        let store = AsyncTrafficStore::new(
            probe,
            AsyncStoreConfig {
                queue_size: 100,
                batch_size: 100,
                flush_period: Duration::from_secs(60),
                workers: 1,
                ..AsyncStoreConfig::default()
            },
        );

        for _ in 0..10 {
            store.enqueue(rec()).unwrap();
        }
        // The single worker may have pulled a few already.
        assert!(store.queue_depth() <= 10);
    }
}
