//! Append-only file store.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use omniproxy_capture::Record;
use omniproxy_observability::Metrics;

use crate::error::{Result, StorageError};
use crate::store::TrafficStore;

/// On-disk layout for the file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// One JSON record per line.
    #[default]
    Ndjson,
    /// Pretty JSON blocks, each followed by a newline.
    Json,
}

/// Writes one record per line (or pretty block) to a file or custom
/// writer. Writes are serialized by a single mutex.
pub struct FileTrafficStore {
    writer: Mutex<Box<dyn Write + Send>>,
    format: FileFormat,
    closed: AtomicBool,
    metrics: Option<Arc<Metrics>>,
}

impl FileTrafficStore {
    /// Opens (creating if needed) the file in append mode, owner-only.
    pub fn open(path: impl AsRef<Path>, format: FileFormat) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut options = std::fs::OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(path)?;

        Ok(Self::from_writer(Box::new(file), format))
    }

    /// Wraps an arbitrary writer.
    pub fn from_writer(writer: Box<dyn Write + Send>, format: FileFormat) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
            closed: AtomicBool::new(false),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn write_one(&self, rec: &Record) -> Result<()> {
        let data = match self.format {
            FileFormat::Json => serde_json::to_vec_pretty(rec)?,
            FileFormat::Ndjson => serde_json::to_vec(rec)?,
        };

        let mut writer = self.writer.lock();
        writer.write_all(&data)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn record_outcome(&self, result: &Result<()>) {
        if let Some(m) = &self.metrics {
            match result {
                Ok(()) => m.record_traffic_stored(),
                Err(_) => m.record_traffic_store_error(),
            }
        }
    }
}

#[async_trait]
impl TrafficStore for FileTrafficStore {
    async fn store(&self, rec: &Record) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        let result = self.write_one(rec);
        self.record_outcome(&result);
        result
    }

    async fn store_batch(&self, recs: &[Record]) -> Result<()> {
        for rec in recs {
            self.store(rec).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.writer.lock().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniproxy_capture::{BodyValue, RequestRecord, ResponseRecord};
    use tempfile::TempDir;

    fn sample() -> Record {
        let mut rec = Record::started(RequestRecord {
            method: "GET".into(),
            url: "http://h/x".into(),
            host: "h".into(),
            path: "/x".into(),
            scheme: "http".into(),
            ..RequestRecord::default()
        });
        rec.response = ResponseRecord {
            status: 200,
            body: Some(BodyValue::Text("ok".into())),
            size: 2,
            ..ResponseRecord::default()
        };
        rec.finish_timing();
        rec
    }

    #[tokio::test]
    async fn ndjson_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("traffic.ndjson");
        let store = FileTrafficStore::open(&path, FileFormat::Ndjson).unwrap();

        let rec = sample();
        store.store(&rec).await.unwrap();
        store.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 1);

        let parsed: Record = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, rec);
    }

    #[tokio::test]
    async fn append_mode_preserves_existing_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("traffic.ndjson");

        let store = FileTrafficStore::open(&path, FileFormat::Ndjson).unwrap();
        store.store(&sample()).await.unwrap();
        store.close().await.unwrap();

        let store = FileTrafficStore::open(&path, FileFormat::Ndjson).unwrap();
        store.store(&sample()).await.unwrap();
        store.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("traffic.ndjson");
        let store = FileTrafficStore::open(&path, FileFormat::Ndjson).unwrap();
        store.close().await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn store_after_close_fails() {
        let dir = TempDir::new().unwrap();
        let store =
            FileTrafficStore::open(dir.path().join("t.ndjson"), FileFormat::Ndjson).unwrap();
        store.close().await.unwrap();
        // close is idempotent
        store.close().await.unwrap();

        let err = store.store(&sample()).await.unwrap_err();
        assert!(matches!(err, StorageError::Closed));
    }

    #[tokio::test]
    async fn batch_writes_every_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ndjson");
        let store = FileTrafficStore::open(&path, FileFormat::Ndjson).unwrap();

        let recs = vec![sample(), sample(), sample()];
        store.store_batch(&recs).await.unwrap();
        store.close().await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 3);
    }

    #[tokio::test]
    async fn pretty_json_format_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.json");
        let store = FileTrafficStore::open(&path, FileFormat::Json).unwrap();
        store.store(&sample()).await.unwrap();
        store.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n  \"request\""));
        let parsed: Record = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.request.host, "h");
    }
}
