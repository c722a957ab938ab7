//! Health endpoints for the signaling hub.
//!
//! Kubernetes-compatible health checks plus a JSON status document:
//! - `GET /health` - Liveness check (is the process running?)
//! - `GET /ready` - Readiness check (can we accept connections?)
//! - `GET /status` - Registry counts and storage mode
//!
//! The `/metrics` endpoint is merged in by `main` from the Prometheus handle.
//!
//! # Health State
//!
//! - `live`: Always true after startup
//! - `ready`: True once the hub is running, false as soon as shutdown begins
//! - `storage`: Whether the durable mirror is configured and reachable.
//!   Storage is advisory, so it does not affect readiness.

use crate::actors::SignalingHubHandle;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Durable mirror mode reported on `/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// No store configured; in-memory only.
    Disabled,
    /// Store configured and reachable at last check.
    Connected,
    /// Store configured but unreachable; running in-memory only.
    Degraded,
}

/// Health state for the signaling hub.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
    storage_configured: AtomicBool,
    storage_connected: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false, storage disabled).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            storage_configured: AtomicBool::new(false),
            storage_connected: AtomicBool::new(false),
        }
    }

    /// Mark the service as ready to accept connections.
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Mark the service as not ready (e.g., during shutdown).
    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    /// Record the outcome of a storage connectivity check.
    pub fn set_storage_connected(&self, connected: bool) {
        self.storage_configured.store(true, Ordering::SeqCst);
        self.storage_connected.store(connected, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Current durable mirror mode.
    #[must_use]
    pub fn storage_mode(&self) -> StorageMode {
        if !self.storage_configured.load(Ordering::SeqCst) {
            StorageMode::Disabled
        } else if self.storage_connected.load(Ordering::SeqCst) {
            StorageMode::Connected
        } else {
            StorageMode::Degraded
        }
    }
}

#[derive(Clone)]
struct HealthRouterState {
    health: Arc<HealthState>,
    hub: SignalingHubHandle,
}

/// `/status` response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    ready: bool,
    storage: StorageMode,
    accepting_new: bool,
    rooms: usize,
    peers: usize,
    messages_processed: u64,
}

/// Create the health router.
///
/// # Endpoints
///
/// - `GET /health` - 200 if the process is running
/// - `GET /ready` - 200 if accepting connections, 503 otherwise
/// - `GET /status` - JSON status, 503 if the hub cannot be queried
pub fn health_router(health_state: Arc<HealthState>, hub: SignalingHubHandle) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .route("/status", get(status_handler))
        .with_state(HealthRouterState {
            health: health_state,
            hub,
        })
}

async fn liveness_handler(State(state): State<HealthRouterState>) -> StatusCode {
    if state.health.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(State(state): State<HealthRouterState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status_handler(
    State(state): State<HealthRouterState>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let status = state.hub.get_status().await.map_err(|e| {
        warn!(target: "hub.http", error = %e, "Hub status query failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(StatusResponse {
        ready: state.health.is_ready(),
        storage: state.health.storage_mode(),
        accepting_new: status.accepting_new,
        rooms: status.rooms,
        peers: status.peers,
        messages_processed: status.messages_processed,
    }))
}
