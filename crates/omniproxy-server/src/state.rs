//! Shared application state.

use std::sync::Arc;

use omniproxy_observability::{HealthChecker, Metrics};
use omniproxy_storage::TrafficQuerier;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// Queryable traffic store.
    pub store: Arc<dyn TrafficQuerier>,
    pub metrics: Arc<Metrics>,
    pub health: Arc<HealthChecker>,
}

impl AppState {
    /// Creates state with fresh metrics and health instances.
    pub fn new(store: Arc<dyn TrafficQuerier>) -> Self {
        Self {
            store,
            metrics: Arc::new(Metrics::new()),
            health: Arc::new(HealthChecker::new()),
        }
    }

    /// Creates state sharing existing metrics and health instances.
    pub fn with_observability(
        store: Arc<dyn TrafficQuerier>,
        metrics: Arc<Metrics>,
        health: Arc<HealthChecker>,
    ) -> Self {
        Self {
            store,
            metrics,
            health,
        }
    }
}
