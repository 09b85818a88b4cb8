//! Liveness and readiness state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

type Check = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

/// Health payload for the liveness and readiness endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uptime: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub checks: HashMap<String, String>,
}

/// Tracks readiness and named health checks.
///
/// Liveness always reports ok while the process runs; readiness requires
/// the ready flag plus every registered check passing.
pub struct HealthChecker {
    ready: AtomicBool,
    checks: RwLock<HashMap<String, Check>>,
    started_at: Instant,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            checks: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Registers a named check evaluated on every readiness probe.
    pub fn register_check<F>(&self, name: &str, check: F)
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.checks.write().insert(name.to_string(), Box::new(check));
    }

    /// Marks the service ready (or not) to receive traffic.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Liveness: ok with uptime.
    pub fn liveness(&self) -> HealthStatus {
        HealthStatus {
            status: "ok".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime: format!("{}s", self.started_at.elapsed().as_secs()),
            checks: HashMap::new(),
        }
    }

    /// Readiness: (healthy, payload with per-check results).
    pub fn readiness(&self) -> (bool, HealthStatus) {
        let ready = self.is_ready();
        let mut results = HashMap::new();
        let mut healthy = ready;

        for (name, check) in self.checks.read().iter() {
            match check() {
                Ok(()) => {
                    results.insert(name.clone(), "ok".to_string());
                }
                Err(reason) => {
                    results.insert(name.clone(), reason);
                    healthy = false;
                }
            }
        }

        if !ready {
            results.insert("ready".to_string(), "not ready".to_string());
        }

        let status = HealthStatus {
            status: if healthy { "ok" } else { "unhealthy" }.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime: String::new(),
            checks: results,
        };
        (healthy, status)
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("ready", &self.is_ready())
            .field("checks", &self.checks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_is_always_ok() {
        let h = HealthChecker::new();
        let status = h.liveness();
        assert_eq!(status.status, "ok");
        assert!(!status.uptime.is_empty());
    }

    #[test]
    fn readiness_requires_flag() {
        let h = HealthChecker::new();
        let (healthy, status) = h.readiness();
        assert!(!healthy);
        assert_eq!(status.checks["ready"], "not ready");

        h.set_ready(true);
        let (healthy, status) = h.readiness();
        assert!(healthy);
        assert_eq!(status.status, "ok");
    }

    #[test]
    fn failing_check_reports_reason() {
        let h = HealthChecker::new();
        h.set_ready(true);
        h.register_check("store", || Err("store closed".to_string()));
        h.register_check("listener", || Ok(()));

        let (healthy, status) = h.readiness();
        assert!(!healthy);
        assert_eq!(status.checks["store"], "store closed");
        assert_eq!(status.checks["listener"], "ok");
        assert_eq!(status.status, "unhealthy");
    }
}
