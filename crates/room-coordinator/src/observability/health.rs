//! Kubernetes-compatible health endpoints.
//!
//! - `GET /health` - liveness probe (is the process running?)
//! - `GET /ready` - readiness probe (can this coordinator accept rooms?)
//!
//! Readiness flips on once the registry actor is running and flips off
//! when shutdown begins, so the load balancer drains joins away before
//! rooms start tearing down. `/metrics` is served separately by the
//! Prometheus exporter.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Router};

/// Liveness and readiness flags for the coordinator process.
#[derive(Debug)]
pub struct HealthState {
    /// True once startup completes.
    live: AtomicBool,
    /// True while the registry accepts new rooms.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live, not yet ready).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    /// Mark the coordinator ready to accept rooms.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the coordinator draining (shutdown in progress).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Build the health router.
///
/// `/health` answers 200 while the process runs; `/ready` answers 200
/// only while the coordinator accepts new rooms, 503 otherwise.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .with_state(health_state)
}

async fn liveness(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
