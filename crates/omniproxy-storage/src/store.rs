//! Store contracts and query types.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use omniproxy_capture::Record;

use crate::error::Result;

/// Write contract for traffic persistence. Implementations are safe under
/// concurrent callers.
#[async_trait]
pub trait TrafficStore: Send + Sync {
    /// Persists a single record.
    async fn store(&self, rec: &Record) -> Result<()>;

    /// Persists multiple records; all-or-nothing at the caller's level.
    async fn store_batch(&self, recs: &[Record]) -> Result<()>;

    /// Releases resources. Idempotent; subsequent operations fail with a
    /// closed error.
    async fn close(&self) -> Result<()>;
}

/// Query contract for stores that can read traffic back.
#[async_trait]
pub trait TrafficQuerier: Send + Sync {
    async fn query(&self, filter: &TrafficFilter) -> Result<Vec<TrafficSummary>>;
    async fn get_by_id(&self, id: i64) -> Result<TrafficDetail>;
    async fn count(&self, filter: &TrafficFilter) -> Result<u64>;
    async fn stats(&self, filter: &TrafficFilter) -> Result<TrafficStats>;
}

/// Criteria for querying stored traffic.
///
/// Host matching is exact here; wildcard semantics exist only at the
/// capture layer.
#[derive(Debug, Clone, Default)]
pub struct TrafficFilter {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub hosts: Vec<String>,
    pub methods: Vec<String>,
    pub status_codes: Vec<u16>,
    pub min_status: Option<u16>,
    pub max_status: Option<u16>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Column to sort by; defaults to `started_at`.
    pub order_by: Option<String>,
    pub descending: bool,
}

/// List view of a stored record.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficSummary {
    pub id: i64,
    pub method: String,
    pub url: String,
    pub host: String,
    pub path: String,
    pub status: u16,
    pub duration_ms: f64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Full detail of a stored record. Bodies are rendered as text only when
/// the corresponding direction is not binary.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficDetail {
    #[serde(flatten)]
    pub summary: TrafficSummary,

    pub scheme: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub request_body_size: i64,
    pub request_is_binary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_content_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    pub response_body_size: i64,
    pub response_is_binary: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_content_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<serde_json::Value>,
}

/// Aggregate statistics for traffic matching a filter.
#[derive(Debug, Clone, Serialize)]
pub struct TrafficStats {
    pub total: u64,
    /// Records with status >= 400.
    pub errors: u64,
    pub avg_duration_ms: f64,
    pub requests_by_method: BTreeMap<String, u64>,
    pub requests_by_status: BTreeMap<u16, u64>,
    pub unique_hosts: u64,
}

/// A store that drops everything. Useful when capture is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardStore;

#[async_trait]
impl TrafficStore for DiscardStore {
    async fn store(&self, _rec: &Record) -> Result<()> {
        Ok(())
    }

    async fn store_batch(&self, _recs: &[Record]) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
