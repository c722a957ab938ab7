//! Pre-configured test data for hub testing.
//!
//! Provides builders for peer identities and the JSON frames browser
//! clients send.

use common::types::PeerId;
use serde_json::{json, Value};
use signaling_hub::identity::PeerIdentity;
use uuid::Uuid;

/// Test peer fixture.
#[derive(Debug, Clone)]
pub struct TestPeer {
    /// Peer ID.
    pub peer_id: String,
    /// Display name.
    pub name: String,
    /// Authenticated user ID, if any.
    pub user_id: Option<Uuid>,
    /// Avatar URL.
    pub avatar_url: Option<String>,
}

impl TestPeer {
    /// Create an anonymous peer whose display name equals its ID.
    #[must_use]
    pub fn new(peer_id: impl Into<String>) -> Self {
        let peer_id = peer_id.into();
        Self {
            name: peer_id.clone(),
            peer_id,
            user_id: None,
            avatar_url: None,
        }
    }

    /// Create an authenticated peer with a random user ID.
    #[must_use]
    pub fn authenticated(name: impl Into<String>) -> Self {
        let user_id = Uuid::new_v4();
        Self {
            peer_id: user_id.to_string(),
            name: name.into(),
            user_id: Some(user_id),
            avatar_url: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    /// Peer ID as the hub's type.
    #[must_use]
    pub fn id(&self) -> PeerId {
        PeerId::from(self.peer_id.as_str())
    }

    /// Build the identity the auth layer would attach.
    #[must_use]
    pub fn identity(&self) -> PeerIdentity {
        let identity = match self.user_id {
            Some(user_id) => PeerIdentity::authenticated(user_id, self.name.clone()),
            None => PeerIdentity::new(self.id(), self.name.clone()),
        };
        match &self.avatar_url {
            Some(avatar_url) => identity.with_avatar(avatar_url.clone()),
            None => identity,
        }
    }
}

/// `offer` addressed to `to`.
#[must_use]
pub fn offer(to: &str, sdp: &str) -> Value {
    json!({ "type": "offer", "to": to, "data": { "type": "offer", "sdp": sdp } })
}

/// `answer` addressed to `to`.
#[must_use]
pub fn answer(to: &str, sdp: &str) -> Value {
    json!({ "type": "answer", "to": to, "data": { "type": "answer", "sdp": sdp } })
}

/// `ice-candidate` addressed to `to`.
#[must_use]
pub fn ice_candidate(to: &str, candidate: &str) -> Value {
    json!({
        "type": "ice-candidate",
        "to": to,
        "data": { "candidate": candidate, "sdpMLineIndex": 0, "sdpMid": "0" }
    })
}

/// Broadcast `chat-message`.
#[must_use]
pub fn chat_message(content: &str) -> Value {
    json!({ "type": "chat-message", "data": { "content": content } })
}

/// Broadcast `chat-typing` with an empty payload.
#[must_use]
pub fn typing() -> Value {
    json!({ "type": "chat-typing" })
}

/// `join`, which requests the room roster.
#[must_use]
pub fn join() -> Value {
    json!({ "type": "join" })
}

/// `leave`.
#[must_use]
pub fn leave() -> Value {
    json!({ "type": "leave" })
}

/// `peer-state` reporting `state`.
#[must_use]
pub fn peer_state(state: &str) -> Value {
    json!({ "type": "peer-state", "data": { "state": state } })
}
