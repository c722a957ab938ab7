//! Signaling hub error types.
//!
//! Storage failures are absorbed at the storage boundary and never surface as
//! hub failures. Registry races (`PeerNotFound`, `RoomNotFound`,
//! `DuplicateRegistration`) are benign and logged where they are detected.
//! Internal details are logged server-side but not exposed to clients.

use crate::model::PeerState;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Signaling hub error type.
///
/// Maps to HTTP status codes for the status surface:
/// - `PeerNotFound`, `RoomNotFound`: 404
/// - `InvalidStateTransition`, `Protocol`: 400
/// - `DuplicateRegistration`: 409
/// - `ShuttingDown`, `StorageUnavailable`: 503
/// - `DeadPeerConnection`, `Config`, `Internal`: 500
#[derive(Debug, Error)]
pub enum HubError {
    /// Durable mirror unreachable. Never fatal, callers fall back to in-memory state.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Operation referenced a peer that is no longer registered.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Referenced meeting has no active room.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Outbound delivery to a peer overflowed or its queue is closed.
    #[error("Dead peer connection: {0}")]
    DeadPeerConnection(String),

    /// A peer ID is already registered to a live connection.
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// Requested peer state transition is not allowed.
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: PeerState, to: PeerState },

    /// Inbound frame could not be interpreted.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The hub stopped accepting work.
    #[error("Hub is shutting down")]
    ShuttingDown,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors from the durable key-value mirror.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store could not be reached or rejected the command.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("Corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl HubError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            HubError::PeerNotFound(_) | HubError::RoomNotFound(_) => 404,
            HubError::InvalidStateTransition { .. } | HubError::Protocol(_) => 400,
            HubError::DuplicateRegistration(_) => 409,
            HubError::ShuttingDown | HubError::StorageUnavailable(_) => 503,
            HubError::DeadPeerConnection(_) | HubError::Config(_) | HubError::Internal(_) => 500,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            HubError::StorageUnavailable(_)
            | HubError::DeadPeerConnection(_)
            | HubError::Config(_)
            | HubError::Internal(_) => "An internal error occurred".to_string(),
            HubError::PeerNotFound(_) => "Participant not found".to_string(),
            HubError::RoomNotFound(_) => "Meeting has no active room".to_string(),
            HubError::DuplicateRegistration(_) => "Participant is already connected".to_string(),
            HubError::InvalidStateTransition { from, to } => {
                format!("Cannot change connection state from {from} to {to}")
            }
            HubError::Protocol(_) => "Malformed signaling message".to_string(),
            HubError::ShuttingDown => "Server is shutting down, please reconnect".to_string(),
        }
    }

    /// True for errors that describe an expected registry race rather than a fault.
    #[must_use]
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            HubError::PeerNotFound(_)
                | HubError::RoomNotFound(_)
                | HubError::DuplicateRegistration(_)
        )
    }
}

/// Error body returned by the HTTP surface.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl HubError {
    /// Stable machine-readable code for the error body.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            HubError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            HubError::PeerNotFound(_) => "PEER_NOT_FOUND",
            HubError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            HubError::DeadPeerConnection(_) => "DEAD_PEER_CONNECTION",
            HubError::DuplicateRegistration(_) => "DUPLICATE_REGISTRATION",
            HubError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            HubError::Protocol(_) => "BAD_REQUEST",
            HubError::ShuttingDown => "SHUTTING_DOWN",
            HubError::Config(_) | HubError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            // Log actual error server-side, return generic message to client
            tracing::warn!(target: "hub.http", error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for HubError {
    fn from(err: StorageError) -> Self {
        HubError::StorageUnavailable(err.to_string())
    }
}
