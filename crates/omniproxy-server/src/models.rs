//! Request and response models for the API.

use serde::{Deserialize, Serialize};

use omniproxy_storage::TrafficSummary;

/// Query parameters for `GET /traffic`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrafficQuery {
    /// Page size, 1..=1000 (default 100).
    pub limit: Option<u64>,
    /// Rows to skip (default 0).
    pub offset: Option<u64>,
    /// Exact host match.
    pub host: Option<String>,
    pub method: Option<String>,
    /// Exact status code.
    pub status: Option<u16>,
    /// Minimum status code.
    pub min_status: Option<u16>,
}

/// The listing response envelope.
#[derive(Debug, Serialize)]
pub struct TrafficListResponse {
    pub records: Vec<TrafficSummary>,
    pub total: u64,
    pub limit: u64,
    pub offset: u64,
}
