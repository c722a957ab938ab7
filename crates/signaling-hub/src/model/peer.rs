//! Peer value type and its connection-state machine.

use crate::identity::PeerIdentity;
use chrono::{DateTime, Utc};
use common::types::{PeerId, RoomId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Display names the front-ends send when the user has not set one.
const PLACEHOLDER_NAMES: &[&str] = &["anonymous user", "anonymous", "undefined", "null"];

/// Connection state of a peer.
///
/// ```text
/// new -> connecting -> connected -> {disconnected, failed} -> closed
/// ```
///
/// `disconnected` may recover (`connecting` on ICE restart, or straight back to
/// `connected`). Every non-closed state may move to `closed`. `closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// Returns the state as its wire string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        }
    }

    /// Whether moving from `self` to `next` is an allowed transition.
    ///
    /// Same-state updates are allowed (activity refresh), except on `closed`.
    #[must_use]
    pub const fn can_transition_to(self, next: PeerState) -> bool {
        use PeerState::{Closed, Connected, Connecting, Disconnected, Failed, New};

        matches!(
            (self, next),
            (New, New | Connecting | Closed)
                | (Connecting, Connecting | Connected | Failed | Closed)
                | (Connected, Connected | Disconnected | Failed | Closed)
                | (Disconnected, Disconnected | Connecting | Connected | Failed | Closed)
                | (Failed, Failed | Closed)
        )
    }

    /// True once the peer can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, PeerState::Closed)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connected participant's signaling-level identity and state.
///
/// Field names match the JSON records stored in the durable mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: PeerId,
    #[serde(rename = "meetingId")]
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_user_id: Option<Uuid>,
    pub name: String,
    #[serde(rename = "isAuth")]
    pub is_authenticated: bool,
    pub state: PeerState,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Peer {
    /// Create a peer in state `new` from a validated identity.
    ///
    /// `display_name` is used as given; callers resolve placeholders first
    /// (see [`resolve_display_name`]).
    #[must_use]
    pub fn new(identity: &PeerIdentity, room_id: RoomId, display_name: String) -> Self {
        let now = Utc::now();
        Self {
            id: identity.peer_id.clone(),
            room_id,
            user_id: identity.user_id,
            public_user_id: identity.public_user_id,
            name: display_name,
            is_authenticated: identity.is_authenticated,
            state: PeerState::New,
            joined_at: now,
            last_seen: now,
        }
    }

    /// Refresh the last-activity timestamp. Never moves it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    /// True when the peer has not been seen for longer than `threshold`.
    #[must_use]
    pub fn is_stale(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_seen) > threshold
    }
}

/// True when `name` is empty or one of the placeholders front-ends send.
#[must_use]
pub fn is_placeholder_name(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.is_empty()
        || PLACEHOLDER_NAMES
            .iter()
            .any(|placeholder| trimmed.eq_ignore_ascii_case(placeholder))
}

/// Resolve the name shown to other participants.
///
/// A legitimate `supplied` name is returned unchanged. Placeholders are
/// replaced by a deterministic label derived from the peer ID:
///
/// - `user_<uuid>` → `User <first 3 chars of uuid>`
/// - `public_<uuid>` → `Guest <first 4 chars of uuid>`
/// - anything else → `Participant <last 4 chars of id>`
#[must_use]
pub fn resolve_display_name(peer_id: &PeerId, supplied: &str) -> String {
    if !is_placeholder_name(supplied) {
        return supplied.to_string();
    }

    let id = peer_id.as_str();
    if let Some(rest) = id.strip_prefix("user_").filter(|r| !r.is_empty()) {
        return format!("User {}", leading_chars(rest, 3));
    }
    if let Some(rest) = id.strip_prefix("public_").filter(|r| !r.is_empty()) {
        return format!("Guest {}", leading_chars(rest, 4));
    }

    let suffix = trailing_chars(id, 4);
    if suffix.is_empty() {
        "Participant".to_string()
    } else {
        format!("Participant {suffix}")
    }
}

fn leading_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn trailing_chars(s: &str, n: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(n)).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn guest(id: &str) -> PeerIdentity {
        PeerIdentity::new(PeerId::from(id), "")
    }

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(PeerState::New.can_transition_to(PeerState::Connecting));
        assert!(PeerState::Connecting.can_transition_to(PeerState::Connected));
        assert!(PeerState::Connected.can_transition_to(PeerState::Disconnected));
        assert!(PeerState::Connected.can_transition_to(PeerState::Failed));
        assert!(PeerState::Disconnected.can_transition_to(PeerState::Closed));
        assert!(PeerState::Failed.can_transition_to(PeerState::Closed));
    }

    #[test]
    fn test_skipping_transitions_rejected() {
        assert!(!PeerState::New.can_transition_to(PeerState::Connected));
        assert!(!PeerState::New.can_transition_to(PeerState::Disconnected));
        assert!(!PeerState::Connecting.can_transition_to(PeerState::Disconnected));
        assert!(!PeerState::Failed.can_transition_to(PeerState::Connected));
    }

    #[test]
    fn test_closed_is_terminal() {
        for next in [
            PeerState::New,
            PeerState::Connecting,
            PeerState::Connected,
            PeerState::Disconnected,
            PeerState::Failed,
            PeerState::Closed,
        ] {
            assert!(!PeerState::Closed.can_transition_to(next), "closed -> {next}");
        }
        assert!(PeerState::Closed.is_terminal());
        assert!(!PeerState::Failed.is_terminal());
    }

    #[test]
    fn test_every_live_state_can_close() {
        for state in [
            PeerState::New,
            PeerState::Connecting,
            PeerState::Connected,
            PeerState::Disconnected,
            PeerState::Failed,
        ] {
            assert!(state.can_transition_to(PeerState::Closed), "{state} -> closed");
        }
    }

    #[test]
    fn test_disconnected_can_recover() {
        assert!(PeerState::Disconnected.can_transition_to(PeerState::Connecting));
        assert!(PeerState::Disconnected.can_transition_to(PeerState::Connected));
    }

    #[test]
    fn test_state_wire_format() {
        assert_eq!(
            serde_json::to_string(&PeerState::Disconnected).unwrap(),
            "\"disconnected\""
        );
        let parsed: PeerState = serde_json::from_str("\"connecting\"").unwrap();
        assert_eq!(parsed, PeerState::Connecting);
    }

    #[test]
    fn test_fallback_name_for_user_prefix() {
        let id = PeerId::from("user_3f2a9c10-0000-4000-8000-000000000000");
        assert_eq!(resolve_display_name(&id, ""), "User 3f2");
    }

    #[test]
    fn test_fallback_name_for_public_prefix() {
        let id = PeerId::from("public_9b1c77aa-0000-4000-8000-000000000000");
        assert_eq!(resolve_display_name(&id, "Anonymous User"), "Guest 9b1c");
    }

    #[test]
    fn test_fallback_name_for_other_ids() {
        let id = PeerId::from("session_m1_abcdef1234");
        assert_eq!(resolve_display_name(&id, "  "), "Participant 1234");
    }

    #[test]
    fn test_fallback_name_is_safe_on_short_ids() {
        assert_eq!(resolve_display_name(&PeerId::from("ab"), ""), "Participant ab");
        assert_eq!(resolve_display_name(&PeerId::from("user_x"), ""), "User x");
        assert_eq!(resolve_display_name(&PeerId::from("user_"), ""), "Participant ser_");
        assert_eq!(resolve_display_name(&PeerId::from(""), ""), "Participant");
    }

    #[test]
    fn test_fallback_name_is_deterministic() {
        let id = PeerId::from("public_0123456789");
        assert_eq!(
            resolve_display_name(&id, "undefined"),
            resolve_display_name(&id, "null")
        );
    }

    #[test]
    fn test_legitimate_name_unchanged() {
        let id = PeerId::from("user_123");
        assert_eq!(resolve_display_name(&id, "Alice"), "Alice");
        assert_eq!(resolve_display_name(&id, " Bob "), " Bob ");
    }

    #[test]
    fn test_placeholder_detection_is_case_insensitive() {
        assert!(is_placeholder_name("ANONYMOUS USER"));
        assert!(is_placeholder_name("Undefined"));
        assert!(!is_placeholder_name("Anonymous Coward"));
    }

    #[test]
    fn test_new_peer_starts_new() {
        let peer = Peer::new(&guest("p1"), RoomId::from("m1"), "Alice".to_string());
        assert_eq!(peer.state, PeerState::New);
        assert_eq!(peer.joined_at, peer.last_seen);
        assert!(!peer.is_authenticated);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut peer = Peer::new(&guest("p1"), RoomId::from("m1"), "Alice".to_string());
        let before = peer.last_seen;
        peer.touch(before - chrono::Duration::seconds(30));
        assert_eq!(peer.last_seen, before);
        peer.touch(before + chrono::Duration::seconds(30));
        assert!(peer.last_seen > before);
    }

    #[test]
    fn test_peer_record_field_names() {
        let peer = Peer::new(&guest("p1"), RoomId::from("m1"), "Alice".to_string());
        let json = serde_json::to_value(&peer).unwrap();
        assert_eq!(json["meetingId"], "m1");
        assert_eq!(json["isAuth"], false);
        assert_eq!(json["state"], "new");
        assert!(json.get("joinedAt").is_some());
        assert!(json.get("userId").is_none());
    }
}
