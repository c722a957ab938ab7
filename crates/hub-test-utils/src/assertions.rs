//! Registry helpers for tests.

use common::types::RoomId;
use signaling_hub::actors::{PeerRegistration, Registration, SignalingHubHandle};
use signaling_hub::identity::PeerIdentity;
use signaling_hub::signaling::SignalingMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Queue receiver for a peer registered directly on the hub.
pub type OutboundReceiver = mpsc::Receiver<Arc<SignalingMessage>>;

/// Register `identity` in `room_id` with a queue of `capacity`, bypassing
/// any connection actor.
///
/// # Panics
///
/// Panics if the hub refuses the registration.
pub async fn register_direct(
    hub: &SignalingHubHandle,
    identity: PeerIdentity,
    room_id: &str,
    capacity: usize,
) -> (Registration, OutboundReceiver) {
    let (outbound, receiver) = mpsc::channel(capacity);
    let registration = hub
        .register(PeerRegistration {
            identity,
            room_id: RoomId::from(room_id),
            outbound,
        })
        .await
        .expect("registration should succeed");
    (registration, receiver)
}

/// Wait until `room_id` holds `expected` peers.
///
/// # Panics
///
/// Panics if the count is not reached within one second.
pub async fn wait_for_peer_count(hub: &SignalingHubHandle, room_id: &str, expected: usize) {
    let mut count = 0;
    for _ in 0..200 {
        count = hub
            .peer_count(RoomId::from(room_id))
            .await
            .expect("hub should answer");
        if count == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("room {room_id} has {count} peers, expected {expected}");
}

/// Drain every message currently queued on `receiver`.
pub fn drain(receiver: &mut OutboundReceiver) -> Vec<Arc<SignalingMessage>> {
    let mut messages = Vec::new();
    while let Ok(message) = receiver.try_recv() {
        messages.push(message);
    }
    messages
}
