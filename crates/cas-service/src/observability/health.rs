//! Health endpoints.
//!
//! - `GET /health` - Liveness check (is the process running?)
//! - `GET /ready` - Readiness check: startup finished and the ticket registry
//!   answers `count_tickets`
//!
//! The `/metrics` endpoint is merged in by `main` from the Prometheus handle.

use crate::registry::TicketRegistry;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Liveness and readiness flags.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    /// Set once startup completes; cleared on shutdown.
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

#[derive(Clone)]
struct RouterState {
    health: Arc<HealthState>,
    registry: Arc<dyn TicketRegistry>,
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>, registry: Arc<dyn TicketRegistry>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(RouterState {
            health: health_state,
            registry,
        })
}

async fn liveness_handler(State(state): State<RouterState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// 503 until startup completes, and whenever the registry is unreachable.
#[tracing::instrument(skip_all, name = "cas.health.readiness")]
async fn readiness_handler(State(state): State<RouterState>) -> StatusCode {
    if !state.health.is_ready() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match state.registry.count_tickets().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            // Detail stays in the server log
            warn!(
                target: "cas.health",
                backend = state.registry.backend_name(),
                error = %e,
                "Readiness check failed: registry unavailable"
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
