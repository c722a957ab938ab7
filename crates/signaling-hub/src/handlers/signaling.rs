//! WebSocket upgrade handler.
//!
//! - `GET /api/v1/ws/meetings/{id}` - Upgrade into a `ConnectionActor`
//!
//! The external auth layer may attach a validated [`PeerIdentity`] as a
//! request extension. Without one, the connection joins as an
//! unauthenticated guest identified by the `clientId` / `sessionId` query
//! parameters.

use super::parse_room_id;
use crate::actors::ConnectionActor;
use crate::errors::HubError;
use crate::identity::PeerIdentity;
use crate::routes::AppState;
use crate::transport::websocket::serve_socket;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::Response,
    Extension,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub client_id: Option<String>,
    pub session_id: Option<String>,
    pub name: Option<String>,
}

/// Handler for GET /api/v1/ws/meetings/{id}
///
/// # Response
///
/// - 101 Switching Protocols: connection handed to a `ConnectionActor`
/// - 400 Bad Request: invalid meeting ID or not an upgrade request
/// - 503 Service Unavailable: hub is shutting down
#[instrument(skip_all, fields(meeting_id = %id))]
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ConnectQuery>,
    identity: Option<Extension<PeerIdentity>>,
    ws: WebSocketUpgrade,
) -> Result<Response, HubError> {
    let room_id = parse_room_id(&id)?;

    if state.hub.is_cancelled() {
        return Err(HubError::ShuttingDown);
    }

    let identity = match identity {
        Some(Extension(identity)) => identity,
        None => PeerIdentity::from_connect_params(
            &room_id,
            query.client_id.as_deref(),
            query.session_id.as_deref(),
            query.name.as_deref(),
        ),
    };

    debug!(
        target: "hub.http",
        peer_id = %identity.peer_id,
        room_id = %room_id,
        authenticated = identity.is_authenticated,
        "Upgrading signaling connection"
    );

    let actor = ConnectionActor::new(
        state.hub.clone(),
        Arc::clone(&state.metrics),
        identity,
        room_id,
        state.settings,
    );

    Ok(ws.on_upgrade(move |socket| async move {
        if let Err(e) = serve_socket(socket, actor).await {
            warn!(target: "hub.http", error = %e, "Signaling connection refused");
        }
    }))
}
