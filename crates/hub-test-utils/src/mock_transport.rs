//! In-memory transport for connection actor tests.
//!
//! A [`TestClient`] plays the browser: it writes frames the actor reads and
//! reads frames the actor writes. Both directions are unbounded
//! `futures::channel::mpsc` channels.

use crate::fixtures::TestPeer;
use common::types::RoomId;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::Value;
use signaling_hub::actors::{
    ActorMetrics, ConnectionActor, ConnectionSettings, LeaveReason, SignalingHubHandle,
};
use signaling_hub::errors::HubError;
use signaling_hub::signaling::SignalingMessage;
use signaling_hub::transport::{Frame, TransportError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long `next_*` helpers wait before failing the test.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Client end of an in-memory connection.
pub struct TestClient {
    to_server: Option<mpsc::UnboundedSender<Result<Frame, TransportError>>>,
    from_server: mpsc::UnboundedReceiver<Frame>,
    task: JoinHandle<Result<LeaveReason, HubError>>,
}

impl TestClient {
    /// Connect `peer` to `room_id` with default settings and wait until the
    /// hub has registered it.
    pub async fn connect(hub: &SignalingHubHandle, peer: TestPeer, room_id: &str) -> Self {
        let client = Self::spawn(hub, peer.clone(), room_id, ConnectionSettings::default());
        wait_registered(hub, &peer).await;
        client
    }

    /// Start a connection actor without waiting for registration.
    #[must_use]
    pub fn spawn(
        hub: &SignalingHubHandle,
        peer: TestPeer,
        room_id: &str,
        settings: ConnectionSettings,
    ) -> Self {
        let (to_server, server_rx) = mpsc::unbounded();
        let (server_tx, from_server) = mpsc::unbounded();
        let actor = ConnectionActor::new(
            hub.clone(),
            ActorMetrics::new(),
            peer.identity(),
            RoomId::from(room_id),
            settings,
        );
        let task = tokio::spawn(actor.run(server_tx, server_rx));
        Self {
            to_server: Some(to_server),
            from_server,
            task,
        }
    }

    /// Send a raw frame.
    ///
    /// # Panics
    ///
    /// Panics if the client was closed.
    pub fn send_frame(&self, frame: Frame) {
        self.to_server
            .as_ref()
            .expect("client is closed")
            .unbounded_send(Ok(frame))
            .expect("connection actor has stopped reading");
    }

    /// Send a JSON value as a text frame.
    pub fn send_json(&self, value: Value) {
        self.send_frame(Frame::Text(value.to_string()));
    }

    /// Next frame from the server, whatever its kind.
    ///
    /// # Panics
    ///
    /// Panics on timeout or when the server side has gone away.
    pub async fn next_frame(&mut self) -> Frame {
        tokio::time::timeout(RECEIVE_TIMEOUT, self.from_server.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("server side closed")
    }

    /// Next signaling message, skipping keepalive frames.
    ///
    /// # Panics
    ///
    /// Panics on timeout, on `Close`, or if a text frame is not a signaling
    /// message.
    pub async fn next_message(&mut self) -> SignalingMessage {
        loop {
            match self.next_frame().await {
                Frame::Text(text) => {
                    return serde_json::from_str(&text).expect("server sent invalid JSON");
                }
                Frame::Ping(_) | Frame::Pong(_) => {}
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Assert nothing but keepalives arrives within `within`.
    ///
    /// # Panics
    ///
    /// Panics if a text, binary or close frame arrives.
    pub async fn expect_silence(&mut self, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            match tokio::time::timeout_at(deadline, self.from_server.next()).await {
                Err(_) => return,
                Ok(Some(Frame::Ping(_) | Frame::Pong(_))) => {}
                Ok(other) => panic!("expected silence, got {other:?}"),
            }
        }
    }

    /// Drop the inbound side, as a browser closing its socket would.
    pub fn close(&mut self) {
        self.to_server = None;
    }

    /// Wait for the connection actor to finish.
    ///
    /// # Panics
    ///
    /// Panics if the actor does not finish in time or panicked.
    pub async fn finish(self) -> Result<LeaveReason, HubError> {
        tokio::time::timeout(RECEIVE_TIMEOUT, self.task)
            .await
            .expect("connection actor did not finish")
            .expect("connection actor panicked")
    }
}

async fn wait_registered(hub: &SignalingHubHandle, peer: &TestPeer) {
    for _ in 0..200 {
        if hub
            .get_peer(peer.identity().peer_id)
            .await
            .expect("hub should answer")
            .is_some()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("peer {} was never registered", peer.peer_id);
}
