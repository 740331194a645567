//! Readiness gate and HTTP probe endpoint.
//!
//! Registered probes must all pass for `GET /ready` to return 200; a
//! failing probe produces 503 with the failing probe names. The server
//! registers cache-sync and initial-snapshot probes; embedders can add
//! their own.

use std::sync::{Arc, RwLock};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::debug;

type Probe = Box<dyn Fn() -> bool + Send + Sync>;

/// A named set of readiness probes.
#[derive(Default)]
pub struct ReadinessGate {
    probes: RwLock<Vec<(String, Probe)>>,
}

impl ReadinessGate {
    /// Create an empty gate (which reports ready).
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named probe.
    pub fn register(&self, name: impl Into<String>, probe: impl Fn() -> bool + Send + Sync + 'static) {
        self.probes
            .write()
            .expect("probe lock poisoned")
            .push((name.into(), Box::new(probe)));
    }

    /// Run all probes; `Err` carries the names of the failing ones.
    pub fn check(&self) -> Result<(), Vec<String>> {
        let probes = self.probes.read().expect("probe lock poisoned");
        let failing: Vec<String> = probes
            .iter()
            .filter(|(_, probe)| !probe())
            .map(|(name, _)| name.clone())
            .collect();
        if failing.is_empty() {
            Ok(())
        } else {
            Err(failing)
        }
    }

    /// Whether every probe passes.
    pub fn is_ready(&self) -> bool {
        self.check().is_ok()
    }
}

/// Build the probe router serving `GET /ready`.
pub fn readiness_router(gate: Arc<ReadinessGate>) -> Router {
    Router::new()
        .route("/ready", get(ready_handler))
        .with_state(gate)
}

async fn ready_handler(State(gate): State<Arc<ReadinessGate>>) -> (StatusCode, String) {
    match gate.check() {
        Ok(()) => (StatusCode::OK, String::new()),
        Err(failing) => {
            debug!(probes = ?failing, "readiness probe failing");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("not ready: {}", failing.join(", ")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn empty_gate_is_ready() {
        assert!(ReadinessGate::new().is_ready());
    }

    #[test]
    fn failing_probe_is_named() {
        let gate = ReadinessGate::new();
        gate.register("always-ok", || true);
        gate.register("never-ok", || false);

        let failing = gate.check().unwrap_err();
        assert_eq!(failing, vec!["never-ok".to_string()]);
    }

    #[test]
    fn probes_reflect_live_state() {
        let gate = ReadinessGate::new();
        let synced = Arc::new(AtomicBool::new(false));
        let probe_synced = Arc::clone(&synced);
        gate.register("cache-synced", move || probe_synced.load(Ordering::SeqCst));

        assert!(!gate.is_ready());
        synced.store(true, Ordering::SeqCst);
        assert!(gate.is_ready());
    }

    #[tokio::test]
    async fn handler_maps_to_status_codes() {
        let gate = Arc::new(ReadinessGate::new());
        let (code, _) = ready_handler(State(Arc::clone(&gate))).await;
        assert_eq!(code, StatusCode::OK);

        gate.register("down", || false);
        let (code, body) = ready_handler(State(gate)).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("down"));
    }
}
