//! Signaling message envelope and typed payloads.
//!
//! The JSON shape and the `type` tags are shared with the browser clients:
//!
//! ```json
//! { "type": "offer", "meetingId": "m1", "from": "u1", "to": "u2",
//!   "data": { "sdp": "..." }, "timestamp": "2024-01-01T00:00:00Z" }
//! ```
//!
//! Messages are immutable once queued: the hub fans out one
//! `Arc<SignalingMessage>` to every recipient.

use crate::errors::HubError;
use crate::model::{Peer, PeerState};
use chrono::{DateTime, Utc};
use common::types::{PeerId, RoomId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Signaling message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "offer")]
    Offer,
    #[serde(rename = "answer")]
    Answer,
    #[serde(rename = "ice-candidate")]
    IceCandidate,
    #[serde(rename = "join")]
    Join,
    #[serde(rename = "leave")]
    Leave,
    #[serde(rename = "participant-joined")]
    ParticipantJoined,
    #[serde(rename = "participant-left")]
    ParticipantLeft,
    #[serde(rename = "chat-message")]
    ChatMessage,
    #[serde(rename = "chat-message-edit", alias = "chat-edit")]
    ChatMessageEdit,
    #[serde(rename = "chat-message-delete", alias = "chat-delete")]
    ChatMessageDelete,
    #[serde(rename = "chat-reaction")]
    ChatReaction,
    #[serde(rename = "chat-read-status")]
    ChatReadStatus,
    #[serde(rename = "chat-typing", alias = "chat-typing-start")]
    ChatTyping,
    #[serde(rename = "chat-typing-stop")]
    ChatTypingStop,
    #[serde(rename = "peer-state")]
    PeerState,
    /// Any tag this server does not know. Ignored by the connection adapter.
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl MessageType {
    /// Returns the wire tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::IceCandidate => "ice-candidate",
            MessageType::Join => "join",
            MessageType::Leave => "leave",
            MessageType::ParticipantJoined => "participant-joined",
            MessageType::ParticipantLeft => "participant-left",
            MessageType::ChatMessage => "chat-message",
            MessageType::ChatMessageEdit => "chat-message-edit",
            MessageType::ChatMessageDelete => "chat-message-delete",
            MessageType::ChatReaction => "chat-reaction",
            MessageType::ChatReadStatus => "chat-read-status",
            MessageType::ChatTyping => "chat-typing",
            MessageType::ChatTypingStop => "chat-typing-stop",
            MessageType::PeerState => "peer-state",
            MessageType::Unknown => "unknown",
        }
    }

    /// True for presence events only the server may originate.
    #[must_use]
    pub const fn is_server_only(&self) -> bool {
        matches!(
            self,
            MessageType::ParticipantJoined | MessageType::ParticipantLeft
        )
    }

    /// True for typing indicators, which the server enriches with sender identity.
    #[must_use]
    pub const fn is_typing(&self) -> bool {
        matches!(self, MessageType::ChatTyping | MessageType::ChatTypingStop)
    }
}

/// Signaling envelope exchanged with clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(rename = "meetingId", default, deserialize_with = "null_as_default")]
    pub room_id: RoomId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub from: PeerId,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub to: Option<PeerId>,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Routing fields are overwritten by the server, so `null` is accepted as empty.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<PeerId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(PeerId::from))
}

impl SignalingMessage {
    /// Build a broadcast message stamped now.
    #[must_use]
    pub fn new(kind: MessageType, room_id: RoomId, from: PeerId, data: Value) -> Self {
        Self {
            kind,
            room_id,
            from,
            to: None,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Address the message to one peer.
    #[must_use]
    pub fn to_peer(mut self, target: PeerId) -> Self {
        self.to = Some(target);
        self
    }

    /// Presence announcement for `peer`, sent on its behalf.
    #[must_use]
    pub fn participant_joined(peer: &Peer, avatar_url: Option<&str>) -> Self {
        let payload = JoinPayload {
            participant_id: peer.id.clone(),
            name: peer.name.clone(),
            avatar_url: avatar_url.map(str::to_string),
            is_authenticated: peer.is_authenticated,
        };
        Self::new(
            MessageType::ParticipantJoined,
            peer.room_id.clone(),
            peer.id.clone(),
            serde_json::to_value(payload).unwrap_or(Value::Null),
        )
    }

    /// Departure announcement for `peer_id`.
    #[must_use]
    pub fn participant_left(room_id: RoomId, peer_id: PeerId) -> Self {
        let data = serde_json::json!({ "participantId": peer_id });
        Self::new(MessageType::ParticipantLeft, room_id, peer_id, data)
    }

    /// Decode `data` into a typed payload.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, HubError> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            HubError::Protocol(format!("invalid {} payload: {e}", self.kind.as_str()))
        })
    }

    /// True when the message has no target peer.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }

    /// Overwrite routing metadata from the connection's identity.
    pub fn stamp(&mut self, room_id: &RoomId, from: &PeerId) {
        self.room_id = room_id.clone();
        self.from = from.clone();
        self.timestamp = Utc::now();
    }

    /// Add the sender's identity to a typing indicator payload.
    ///
    /// A missing payload becomes an empty object. Non-object payloads are rejected.
    pub fn enrich_typing(
        &mut self,
        user_id: Option<Uuid>,
        public_user_id: Option<Uuid>,
        user_name: &str,
    ) -> Result<(), HubError> {
        if self.data.is_null() {
            self.data = Value::Object(Map::new());
        }
        let Value::Object(object) = &mut self.data else {
            return Err(HubError::Protocol(
                "typing payload must be an object".to_string(),
            ));
        };

        object.insert("userId".to_string(), serde_json::json!(user_id));
        object.insert("publicUserId".to_string(), serde_json::json!(public_user_id));
        object.insert("userName".to_string(), Value::String(user_name.to_string()));
        Ok(())
    }
}

/// `offer` / `answer` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAnswerPayload {
    pub sdp: String,
}

/// `ice-candidate` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidatePayload {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
}

/// `join` / `participant-joined` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub participant_id: PeerId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub is_authenticated: bool,
}

/// `leave` / `participant-left` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeavePayload {
    pub participant_id: PeerId,
}

/// `peer-state` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatePayload {
    pub state: PeerState,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identity::PeerIdentity;

    #[test]
    fn test_decode_offer_envelope() {
        let raw = r#"{"type":"offer","meetingId":"m1","from":"u1","to":"u2",
            "data":{"sdp":"v=0"},"timestamp":"2024-01-01T00:00:00Z"}"#;
        let msg: SignalingMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.kind, MessageType::Offer);
        assert_eq!(msg.to, Some(PeerId::from("u2")));
        let payload: OfferAnswerPayload = msg.payload().unwrap();
        assert_eq!(payload.sdp, "v=0");
    }

    #[test]
    fn test_empty_target_is_broadcast() {
        let raw = r#"{"type":"chat-message","to":"","data":{}}"#;
        let msg: SignalingMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.is_broadcast());
        assert!(msg.room_id.is_empty());

        let out = serde_json::to_value(&msg).unwrap();
        assert!(out.get("to").is_none());
    }

    #[test]
    fn test_null_routing_fields_accepted() {
        let raw = r#"{"type":"offer","meetingId":"r","from":null,"to":"u2","data":{"sdp":"x"}}"#;
        let msg: SignalingMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.from.is_empty());
        assert_eq!(msg.room_id.as_str(), "r");

        let raw = r#"{"type":"chat-message","meetingId":null,"data":{}}"#;
        let msg: SignalingMessage = serde_json::from_str(raw).unwrap();
        assert!(msg.room_id.is_empty());
    }

    #[test]
    fn test_aliases_accepted() {
        for (tag, expected) in [
            ("chat-edit", MessageType::ChatMessageEdit),
            ("chat-delete", MessageType::ChatMessageDelete),
            ("chat-typing-start", MessageType::ChatTyping),
            ("chat-message-edit", MessageType::ChatMessageEdit),
        ] {
            let msg: SignalingMessage =
                serde_json::from_value(serde_json::json!({ "type": tag })).unwrap();
            assert_eq!(msg.kind, expected, "{tag}");
        }
        assert_eq!(
            serde_json::to_value(MessageType::ChatTyping).unwrap(),
            "chat-typing"
        );
    }

    #[test]
    fn test_unknown_tag_is_not_fatal() {
        let msg: SignalingMessage =
            serde_json::from_str(r#"{"type":"screen-share","data":1}"#).unwrap();
        assert_eq!(msg.kind, MessageType::Unknown);
    }

    #[test]
    fn test_missing_type_is_malformed() {
        assert!(serde_json::from_str::<SignalingMessage>(r#"{"data":{}}"#).is_err());
        assert!(serde_json::from_str::<SignalingMessage>("not json").is_err());
    }

    #[test]
    fn test_ice_candidate_optional_fields() {
        let msg: SignalingMessage = serde_json::from_value(serde_json::json!({
            "type": "ice-candidate",
            "data": { "candidate": "candidate:1", "sdpMLineIndex": 0, "sdpMid": "0" }
        }))
        .unwrap();
        let payload: IceCandidatePayload = msg.payload().unwrap();
        assert_eq!(payload.sdp_m_line_index, Some(0));
        assert_eq!(payload.sdp_mid.as_deref(), Some("0"));
    }

    #[test]
    fn test_payload_mismatch_is_protocol_error() {
        let msg = SignalingMessage::new(
            MessageType::Offer,
            RoomId::from("m1"),
            PeerId::from("u1"),
            serde_json::json!({ "nope": true }),
        );
        let err = msg.payload::<OfferAnswerPayload>().unwrap_err();
        assert!(matches!(err, HubError::Protocol(_)));
    }

    #[test]
    fn test_participant_joined_payload() {
        let identity = PeerIdentity::authenticated(Uuid::new_v4(), "Alice");
        let peer = Peer::new(&identity, RoomId::from("m1"), "Alice".to_string());
        let msg = SignalingMessage::participant_joined(&peer, Some("https://a/x.png"));

        assert_eq!(msg.kind, MessageType::ParticipantJoined);
        assert_eq!(msg.from, peer.id);
        let payload: JoinPayload = msg.payload().unwrap();
        assert_eq!(payload.participant_id, peer.id);
        assert!(payload.is_authenticated);
        assert_eq!(payload.avatar_url.as_deref(), Some("https://a/x.png"));
    }

    #[test]
    fn test_participant_left_payload() {
        let msg = SignalingMessage::participant_left(RoomId::from("m1"), PeerId::from("u2"));
        let payload: LeavePayload = msg.payload().unwrap();
        assert_eq!(payload.participant_id.as_str(), "u2");
        assert_eq!(
            serde_json::to_value(&msg).unwrap()["type"],
            "participant-left"
        );
    }

    #[test]
    fn test_stamp_overwrites_routing() {
        let mut msg: SignalingMessage = serde_json::from_str(
            r#"{"type":"answer","meetingId":"other","from":"spoofed","data":{"sdp":"x"}}"#,
        )
        .unwrap();
        msg.stamp(&RoomId::from("m1"), &PeerId::from("u1"));
        assert_eq!(msg.room_id.as_str(), "m1");
        assert_eq!(msg.from.as_str(), "u1");
    }

    #[test]
    fn test_enrich_typing() {
        let uid = Uuid::new_v4();
        let mut msg = SignalingMessage::new(
            MessageType::ChatTyping,
            RoomId::from("m1"),
            PeerId::from("u1"),
            serde_json::json!({ "isTyping": true }),
        );
        msg.enrich_typing(Some(uid), None, "Alice").unwrap();
        assert_eq!(msg.data["isTyping"], true);
        assert_eq!(msg.data["userId"], uid.to_string());
        assert_eq!(msg.data["publicUserId"], Value::Null);
        assert_eq!(msg.data["userName"], "Alice");

        let mut empty =
            SignalingMessage::new(MessageType::ChatTypingStop, RoomId::from("m1"), PeerId::from("u1"), Value::Null);
        empty.enrich_typing(None, None, "Bob").unwrap();
        assert_eq!(empty.data["userName"], "Bob");

        let mut bad = SignalingMessage::new(
            MessageType::ChatTyping,
            RoomId::from("m1"),
            PeerId::from("u1"),
            serde_json::json!([1, 2]),
        );
        assert!(bad.enrich_typing(None, None, "Bob").is_err());
    }

    #[test]
    fn test_peer_state_payload() {
        let msg: SignalingMessage = serde_json::from_value(serde_json::json!({
            "type": "peer-state",
            "data": { "state": "connected" }
        }))
        .unwrap();
        let payload: PeerStatePayload = msg.payload().unwrap();
        assert_eq!(payload.state, PeerState::Connected);
    }
}
