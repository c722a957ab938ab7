//! Peer identity supplied to the connection adapter.
//!
//! The external auth layer attaches a validated [`PeerIdentity`] to the
//! upgrade request as an extension. When none is present, an unauthenticated
//! guest identity is derived from the connect parameters.

use common::types::{PeerId, RoomId};
use tracing::debug;
use uuid::Uuid;

/// Validated identity of one connecting participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub peer_id: PeerId,
    pub user_id: Option<Uuid>,
    pub public_user_id: Option<Uuid>,
    pub display_name: String,
    pub is_authenticated: bool,
    pub avatar_url: Option<String>,
}

impl PeerIdentity {
    /// Unauthenticated identity with an explicit peer ID.
    #[must_use]
    pub fn new(peer_id: PeerId, display_name: impl Into<String>) -> Self {
        Self {
            peer_id,
            user_id: None,
            public_user_id: None,
            display_name: display_name.into(),
            is_authenticated: false,
            avatar_url: None,
        }
    }

    /// Identity of an authenticated user. The peer ID is `user_{uuid}`.
    #[must_use]
    pub fn authenticated(user_id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            peer_id: PeerId::new(format!("user_{user_id}")),
            user_id: Some(user_id),
            public_user_id: None,
            display_name: display_name.into(),
            is_authenticated: true,
            avatar_url: None,
        }
    }

    /// Identity of a registered public guest. The peer ID is `public_{uuid}`.
    #[must_use]
    pub fn public_guest(public_user_id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            peer_id: PeerId::new(format!("public_{public_user_id}")),
            user_id: None,
            public_user_id: Some(public_user_id),
            display_name: display_name.into(),
            is_authenticated: false,
            avatar_url: None,
        }
    }

    /// Attach an avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, avatar_url: impl Into<String>) -> Self {
        self.avatar_url = Some(avatar_url.into());
        self
    }

    /// Build a guest identity from connect parameters.
    ///
    /// The peer ID is the first of: explicit `client_id`,
    /// `session_{room}_{session}`, a random UUID. Never authenticated.
    #[must_use]
    pub fn from_connect_params(
        room_id: &RoomId,
        client_id: Option<&str>,
        session_id: Option<&str>,
        display_name: Option<&str>,
    ) -> Self {
        let name = display_name.unwrap_or_default();

        if let Some(client_id) = non_blank(client_id) {
            return Self::new(PeerId::from(client_id), name);
        }

        if let Some(session_id) = non_blank(session_id) {
            return Self::new(PeerId::new(format!("session_{room_id}_{session_id}")), name);
        }

        let generated = Uuid::new_v4().to_string();
        debug!(
            target: "hub.actor.connection",
            room_id = %room_id,
            peer_id = %generated,
            "No client or session id supplied, generated peer id"
        );
        Self::new(PeerId::new(generated), name)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticated_peer_id() {
        let uid = Uuid::new_v4();
        let identity = PeerIdentity::authenticated(uid, "Alice");
        assert_eq!(identity.peer_id.as_str(), format!("user_{uid}"));
        assert!(identity.is_authenticated);
        assert_eq!(identity.user_id, Some(uid));
    }

    #[test]
    fn test_public_guest_peer_id() {
        let pid = Uuid::new_v4();
        let identity = PeerIdentity::public_guest(pid, "Guest");
        assert_eq!(identity.peer_id.as_str(), format!("public_{pid}"));
        assert!(!identity.is_authenticated);
        assert_eq!(identity.public_user_id, Some(pid));
    }

    #[test]
    fn test_client_id_wins() {
        let room = RoomId::from("m1");
        let identity =
            PeerIdentity::from_connect_params(&room, Some("abc"), Some("s1"), Some("Bob"));
        assert_eq!(identity.peer_id.as_str(), "abc");
        assert_eq!(identity.display_name, "Bob");
        assert!(!identity.is_authenticated);
    }

    #[test]
    fn test_session_id_fallback() {
        let room = RoomId::from("m1");
        let identity = PeerIdentity::from_connect_params(&room, Some("  "), Some("s1"), None);
        assert_eq!(identity.peer_id.as_str(), "session_m1_s1");
        assert_eq!(identity.display_name, "");
    }

    #[test]
    fn test_random_fallback_is_uuid() {
        let room = RoomId::from("m1");
        let a = PeerIdentity::from_connect_params(&room, None, None, None);
        let b = PeerIdentity::from_connect_params(&room, None, None, None);
        assert!(Uuid::parse_str(a.peer_id.as_str()).is_ok());
        assert_ne!(a.peer_id, b.peer_id);
    }

    #[test]
    fn test_with_avatar() {
        let identity = PeerIdentity::new(PeerId::from("p1"), "P").with_avatar("https://a/b.png");
        assert_eq!(identity.avatar_url.as_deref(), Some("https://a/b.png"));
    }
}
