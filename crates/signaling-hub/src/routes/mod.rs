//! HTTP routes for the signaling hub.
//!
//! Defines the Axum router and application state. Health, readiness, status
//! and metrics live on the separate health router.

use crate::actors::{ActorMetrics, ConnectionSettings, SignalingHubHandle};
use crate::handlers;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the registry owner.
    pub hub: SignalingHubHandle,

    /// Shared actor metrics (connection counts, evictions).
    pub metrics: Arc<ActorMetrics>,

    /// Timing and buffering applied to every new connection.
    pub settings: ConnectionSettings,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/api/v1/ws/meetings/:id` - WebSocket signaling
/// - `/api/v1/webrtc/meetings/:id/peers` - Room peer listing
/// - `/api/v1/webrtc/meetings/:id/stats` - Room statistics
/// - TraceLayer for request logging
///
/// No request timeout layer: upgraded connections are long-lived.
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/ws/meetings/:id", get(handlers::ws_upgrade))
        .route("/api/v1/webrtc/meetings/:id/peers", get(handlers::list_peers))
        .route("/api/v1/webrtc/meetings/:id/stats", get(handlers::room_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
