//! HTTP request handlers for the signaling hub.

pub mod rooms;
pub mod signaling;

pub use rooms::{list_peers, room_stats};
pub use signaling::ws_upgrade;

use crate::errors::HubError;
use common::types::RoomId;

/// Maximum accepted meeting ID length.
pub const MAX_ROOM_ID_LEN: usize = 128;

/// Validate a meeting ID taken from the request path.
pub fn parse_room_id(raw: &str) -> Result<RoomId, HubError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(HubError::Protocol("meeting id is required".to_string()));
    }
    if trimmed.len() > MAX_ROOM_ID_LEN {
        return Err(HubError::Protocol(format!(
            "meeting id exceeds {MAX_ROOM_ID_LEN} characters"
        )));
    }
    Ok(RoomId::from(trimmed))
}
