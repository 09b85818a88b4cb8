//! Observability primitives: a metrics registry and a health checker.
//!
//! No exporter is assumed; the registry serializes to a JSON snapshot that
//! the API server exposes on `/metrics`, and the health checker backs
//! `/healthz` and `/readyz`.

mod health;
mod metrics;

pub use health::{HealthChecker, HealthStatus};
pub use metrics::{Histogram, HistogramSnapshot, Metrics, MetricsSnapshot};
