//! Health endpoints for the relay.
//!
//! - `GET /health` - liveness: the coordinator actor has not been cancelled
//! - `GET /ready` - readiness: the signaling listener is accepting AND the
//!   coordinator answers a stats query within [`COORDINATOR_PROBE_TIMEOUT`]
//!
//! Readiness probes the actor for real instead of trusting a startup flag:
//! a coordinator with a wedged or closed mailbox fails the probe even
//! though the process is still up. Successful probes report the live
//! room/channel/session counters in the body.

use crate::coordinator::CoordinatorHandle;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// How long a readiness probe waits for the coordinator to answer.
pub const COORDINATOR_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Health state for the relay.
pub struct HealthState {
    /// True while the signaling listener is bound and accepting; cleared
    /// when shutdown starts so load balancers drain before the close.
    accepting: AtomicBool,
    coordinator: CoordinatorHandle,
}

impl HealthState {
    /// Create health state over the coordinator. Starts not accepting;
    /// call [`HealthState::set_accepting`] once the listener is bound.
    #[must_use]
    pub fn new(coordinator: CoordinatorHandle) -> Self {
        Self {
            accepting: AtomicBool::new(false),
            coordinator,
        }
    }

    /// Mark the signaling listener as accepting.
    pub fn set_accepting(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    /// Mark the relay as draining (shutdown in progress).
    pub fn set_draining(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Whether the signaling listener is accepting.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Liveness: the coordinator's actor tree is still running.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.coordinator.is_cancelled()
    }

    /// Readiness: accepting, and the coordinator answered a stats query in
    /// time. Returns the counters on success.
    pub async fn probe_ready(&self) -> Option<Value> {
        if !self.is_accepting() {
            return None;
        }
        let stats = timeout(COORDINATOR_PROBE_TIMEOUT, self.coordinator.stats())
            .await
            .ok()??;
        Some(json!({
            "rooms": stats.rooms,
            "channels": stats.channels,
            "sessions": stats.sessions,
        }))
    }
}

/// Create the health router with liveness and readiness endpoints.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<Value>) {
    match state.probe_ready().await {
        Some(stats) => (StatusCode::OK, Json(stats)),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"ready": false})),
        ),
    }
}
