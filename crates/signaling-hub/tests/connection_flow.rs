//! Integration tests for client sessions over the connection actor.
//!
//! Each client runs a real `ConnectionActor` over an in-memory duplex, so
//! these tests cover decoding, stamping, routing and teardown end to end.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashSet;
use std::time::Duration;

use common::types::{PeerId, RoomId};
use hub_test_utils::{fixtures, test_hub, wait_for_peer_count, TestClient, TestPeer};
use serde_json::json;
use signaling_hub::actors::{ConnectionSettings, LeaveReason};
use signaling_hub::model::PeerState;
use signaling_hub::signaling::MessageType;
use signaling_hub::transport::Frame;

#[tokio::test]
async fn test_offer_answer_ice_exchange() {
    let hub = test_hub();
    let mut alice = TestClient::connect(&hub, TestPeer::new("alice"), "m1").await;
    let mut bob = TestClient::connect(&hub, TestPeer::new("bob"), "m1").await;

    let joined = alice.next_message().await;
    assert_eq!(joined.kind, MessageType::ParticipantJoined);
    assert_eq!(joined.from.as_str(), "bob");

    alice.send_json(fixtures::offer("bob", "v=0 offer"));
    let offer = bob.next_message().await;
    assert_eq!(offer.kind, MessageType::Offer);
    assert_eq!(offer.from.as_str(), "alice");
    assert_eq!(offer.room_id.as_str(), "m1");
    assert_eq!(offer.to, Some(PeerId::from("bob")));
    assert_eq!(offer.data["sdp"], "v=0 offer");

    bob.send_json(fixtures::answer("alice", "v=0 answer"));
    let answer = alice.next_message().await;
    assert_eq!(answer.kind, MessageType::Answer);
    assert_eq!(answer.from.as_str(), "bob");

    bob.send_json(fixtures::ice_candidate("alice", "candidate:1 1 udp 1 10.0.0.1 5000 typ host"));
    let candidate = alice.next_message().await;
    assert_eq!(candidate.kind, MessageType::IceCandidate);
    assert_eq!(candidate.data["sdpMLineIndex"], 0);
}

#[tokio::test]
async fn test_client_cannot_spoof_room_or_sender() {
    let hub = test_hub();
    let mut alice = TestClient::connect(&hub, TestPeer::new("alice"), "m1").await;
    let mut bob = TestClient::connect(&hub, TestPeer::new("bob"), "m1").await;
    let mut eve = TestClient::connect(&hub, TestPeer::new("eve"), "m2").await;
    alice.next_message().await;

    bob.send_json(json!({
        "type": "chat-message",
        "meetingId": "m2",
        "from": "alice",
        "data": { "content": "hi" }
    }));

    let chat = alice.next_message().await;
    assert_eq!(chat.from.as_str(), "bob");
    assert_eq!(chat.room_id.as_str(), "m1");
    eve.expect_silence(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_join_returns_roster() {
    let hub = test_hub();
    let _alice = TestClient::connect(&hub, TestPeer::new("alice"), "m1").await;
    let _bob = TestClient::connect(&hub, TestPeer::new("bob").with_avatar("https://a/b.png"), "m1").await;
    let mut carol = TestClient::connect(&hub, TestPeer::new("carol"), "m1").await;

    carol.send_json(fixtures::join());

    let mut roster = HashSet::new();
    for _ in 0..2 {
        let entry = carol.next_message().await;
        assert_eq!(entry.kind, MessageType::ParticipantJoined);
        assert_eq!(entry.to, Some(PeerId::from("carol")));
        if entry.from.as_str() == "bob" {
            assert_eq!(entry.data["avatarUrl"], "https://a/b.png");
        }
        roster.insert(entry.from.as_str().to_string());
    }
    assert_eq!(
        roster,
        HashSet::from(["alice".to_string(), "bob".to_string()])
    );
    carol.expect_silence(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_typing_indicator_carries_sender_identity() {
    let hub = test_hub();
    let mut alice = TestClient::connect(&hub, TestPeer::new("alice"), "m1").await;
    let author = TestPeer::authenticated("Bob Builder");
    let bob = TestClient::connect(&hub, author.clone(), "m1").await;
    alice.next_message().await;

    bob.send_json(fixtures::typing());

    let typing = alice.next_message().await;
    assert_eq!(typing.kind, MessageType::ChatTyping);
    assert_eq!(typing.data["userName"], "Bob Builder");
    assert_eq!(
        typing.data["userId"],
        json!(author.user_id.unwrap().to_string())
    );
}

#[tokio::test]
async fn test_peer_state_reports_update_registry() {
    let hub = test_hub();
    let alice = TestClient::connect(&hub, TestPeer::new("alice"), "m1").await;

    alice.send_json(fixtures::peer_state("connecting"));
    alice.send_json(fixtures::peer_state("connected"));
    // Invalid from `connected`; ignored without closing the connection
    alice.send_json(fixtures::peer_state("new"));

    let mut state = None;
    for _ in 0..200 {
        state = hub
            .get_peer(PeerId::from("alice"))
            .await
            .unwrap()
            .map(|p| p.state);
        if state == Some(PeerState::Connected) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(state, Some(PeerState::Connected));

    let stats = hub.room_stats(RoomId::from("m1")).await.unwrap().unwrap();
    assert_eq!(stats.state_count.get(&PeerState::Connected), Some(&1));
}

#[tokio::test]
async fn test_disconnect_announces_departure() {
    let hub = test_hub();
    let mut alice = TestClient::connect(&hub, TestPeer::new("alice"), "m1").await;
    let mut bob = TestClient::connect(&hub, TestPeer::new("bob"), "m1").await;
    alice.next_message().await;

    bob.close();
    assert_eq!(bob.finish().await.unwrap(), LeaveReason::Disconnected);

    let left = alice.next_message().await;
    assert_eq!(left.kind, MessageType::ParticipantLeft);
    assert_eq!(left.data["participantId"], "bob");
    wait_for_peer_count(&hub, "m1", 1).await;
}

#[tokio::test]
async fn test_reconnect_replaces_old_session() {
    let hub = test_hub();
    let mut alice = TestClient::connect(&hub, TestPeer::new("alice"), "m1").await;
    let mut old = TestClient::connect(&hub, TestPeer::new("bob"), "m1").await;
    alice.next_message().await;

    let mut new = TestClient::spawn(&hub, TestPeer::new("bob"), "m1", ConnectionSettings::default());

    // The old session is told to go away and stops on its own
    assert_eq!(old.next_frame().await, Frame::Close);
    assert_eq!(old.finish().await.unwrap(), LeaveReason::Disconnected);

    assert_eq!(alice.next_message().await.kind, MessageType::ParticipantLeft);
    assert_eq!(alice.next_message().await.kind, MessageType::ParticipantJoined);
    wait_for_peer_count(&hub, "m1", 2).await;

    new.send_json(fixtures::chat_message("back"));
    let chat = alice.next_message().await;
    assert_eq!(chat.from.as_str(), "bob");
    new.expect_silence(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_hub_shutdown_closes_clients() {
    let hub = test_hub();
    let mut alice = TestClient::connect(&hub, TestPeer::new("alice"), "m1").await;

    assert_eq!(hub.shutdown().await.unwrap(), 1);

    assert_eq!(alice.next_frame().await, Frame::Close);
    assert_eq!(alice.finish().await.unwrap(), LeaveReason::Disconnected);
}
