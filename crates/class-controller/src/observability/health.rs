//! Operational endpoints for the Class Controller.
//!
//! - `GET /health` - Liveness; 200 while the process serves HTTP
//! - `GET /ready` - Readiness; 200 once startup finished and the session
//!   coordinator is running. The body reports the registry as well, but a
//!   degraded registry does not fail readiness since joins never wait on it.
//!
//! `/metrics` is merged in by the binary from the Prometheus handle.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Component flags behind the probes.
#[derive(Debug, Default)]
pub struct HealthState {
    started: AtomicBool,
    coordinator_running: AtomicBool,
    registry_reachable: AtomicBool,
}

/// `/ready` response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub coordinator: &'static str,
    pub registry: &'static str,
}

impl HealthState {
    /// Nothing started yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Startup finished; the coordinator and registry are assumed up until
    /// the first health check says otherwise.
    pub fn mark_started(&self) {
        self.coordinator_running.store(true, Ordering::SeqCst);
        self.registry_reachable.store(true, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
    }

    /// Stop advertising readiness (shutdown in progress).
    pub fn mark_stopping(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn set_coordinator_running(&self, running: bool) {
        self.coordinator_running.store(running, Ordering::SeqCst);
    }

    pub fn set_registry_reachable(&self, reachable: bool) {
        self.registry_reachable.store(reachable, Ordering::SeqCst);
    }

    /// Current readiness view.
    #[must_use]
    pub fn report(&self) -> ReadinessReport {
        let coordinator_running = self.coordinator_running.load(Ordering::SeqCst);
        ReadinessReport {
            ready: self.started.load(Ordering::SeqCst) && coordinator_running,
            coordinator: if coordinator_running { "running" } else { "stopped" },
            registry: if self.registry_reachable.load(Ordering::SeqCst) {
                "reachable"
            } else {
                "degraded"
            },
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.report().ready
    }
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ready", get(readiness))
        .with_state(health_state)
}

async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<ReadinessReport>) {
    let report = state.report();
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::util::ServiceExt;

    async fn get_path(state: &Arc<HealthState>, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = health_router(Arc::clone(state))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[test]
    fn test_readiness_needs_startup_and_coordinator() {
        let state = HealthState::new();
        assert!(!state.is_ready());

        state.mark_started();
        assert!(state.is_ready());

        state.set_coordinator_running(false);
        assert!(!state.is_ready());
        assert_eq!(state.report().coordinator, "stopped");

        state.set_coordinator_running(true);
        state.mark_stopping();
        assert!(!state.is_ready());
    }

    #[test]
    fn test_degraded_registry_keeps_service_ready() {
        let state = HealthState::new();
        state.mark_started();
        state.set_registry_reachable(false);

        let report = state.report();
        assert!(report.ready);
        assert_eq!(report.registry, "degraded");
    }

    #[tokio::test]
    async fn test_probe_endpoints() {
        let state = Arc::new(HealthState::new());

        assert_eq!(get_path(&state, "/health").await.0, StatusCode::OK);
        assert_eq!(
            get_path(&state, "/ready").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.mark_started();
        let (status, body) = get_path(&state, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["ready"], true);
        assert_eq!(body["coordinator"], "running");
        assert_eq!(body["registry"], "reachable");

        assert_eq!(get_path(&state, "/unknown").await.0, StatusCode::NOT_FOUND);
    }
}
