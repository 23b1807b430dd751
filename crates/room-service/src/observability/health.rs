//! Health and metrics endpoints, served on their own listener:
//! - `GET /health` - liveness (is the process running?)
//! - `GET /ready` - readiness (listener bound and backend chosen)
//! - `GET /metrics` - Prometheus text format, when a recorder is installed

use axum::{extract::State, http::StatusCode, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Liveness and readiness flags for probes.
#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// False until the listener is bound, and again once shutdown starts.
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

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
/// `/metrics` is only mounted when a Prometheus handle is supplied.
pub fn health_router(health_state: Arc<HealthState>, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state);

    let router = match metrics {
        Some(handle) => router.merge(
            Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(handle),
        ),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
