//! Room query handlers.
//!
//! - `GET /api/v1/webrtc/meetings/{id}/peers` - Peers of an active room
//! - `GET /api/v1/webrtc/meetings/{id}/stats` - Room statistics

use super::parse_room_id;
use crate::errors::HubError;
use crate::model::Peer;
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::types::RoomId;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Response body for the peers endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeersResponse {
    pub meeting_id: RoomId,
    pub peers: Vec<Peer>,
    pub count: usize,
    pub active: bool,
}

/// Handler for GET /api/v1/webrtc/meetings/{id}/peers
///
/// An unknown meeting yields an empty, inactive listing rather than 404.
#[instrument(skip_all, fields(meeting_id = %id))]
pub async fn list_peers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<PeersResponse>, HubError> {
    let room_id = parse_room_id(&id)?;
    let peers = state.hub.list_peers(room_id.clone()).await?;
    let count = peers.len();

    Ok(Json(PeersResponse {
        meeting_id: room_id,
        peers,
        count,
        active: count > 0,
    }))
}

/// Handler for GET /api/v1/webrtc/meetings/{id}/stats
///
/// # Response
///
/// - 200 OK: `RoomStats`
/// - 404 Not Found: `{ "meetingId": ..., "exists": false }`
#[instrument(skip_all, fields(meeting_id = %id))]
pub async fn room_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, HubError> {
    let room_id = parse_room_id(&id)?;

    match state.hub.room_stats(room_id.clone()).await? {
        Some(stats) => Ok(Json(stats).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "meetingId": room_id, "exists": false })),
        )
            .into_response()),
    }
}
