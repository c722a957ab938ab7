//! `ConnectionActor` - per-connection adapter between a transport and the hub.
//!
//! Each `ConnectionActor`:
//! - Handles exactly one duplex connection
//! - Is 1:1 with room membership (one connection = one peer in one room)
//! - Forwards decoded client messages to the `SignalingHub`
//! - Writes messages queued by the hub back to the client
//!
//! # Lifecycle
//!
//! 1. Registers with the hub, which assigns a connection generation
//! 2. Spawns the write loop (outbound queue, keepalive pings) and runs the read loop
//! 3. Ends on read error, close frame, idle timeout, `leave` or writer failure
//! 4. Unregisters with its generation, so a replaced connection cannot
//!    remove its successor

use crate::config::{
    DEFAULT_IDLE_TIMEOUT_SECONDS, DEFAULT_OUTBOUND_QUEUE_CAPACITY, DEFAULT_PING_INTERVAL_SECONDS,
    DEFAULT_WRITE_TIMEOUT_SECONDS,
};
use crate::errors::HubError;
use crate::identity::PeerIdentity;
use crate::observability::metrics;
use crate::signaling::{MessageType, PeerStatePayload, SignalingMessage};
use crate::transport::{Frame, TransportError};

use super::hub::SignalingHubHandle;
use super::messages::{LeaveReason, PeerRegistration, Registration};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{PeerId, RoomId};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Timing and buffering for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
    pub outbound_capacity: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECONDS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECONDS),
            write_timeout: Duration::from_secs(DEFAULT_WRITE_TIMEOUT_SECONDS),
            outbound_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
        }
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    hub: SignalingHubHandle,
    metrics: Arc<ActorMetrics>,
    identity: PeerIdentity,
    room_id: RoomId,
    settings: ConnectionSettings,
}

impl ConnectionActor {
    #[must_use]
    pub fn new(
        hub: SignalingHubHandle,
        metrics: Arc<ActorMetrics>,
        identity: PeerIdentity,
        room_id: RoomId,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            hub,
            metrics,
            identity,
            room_id,
            settings,
        }
    }

    /// Run the connection to completion.
    ///
    /// Returns why the connection ended, or the registration error. A refused
    /// registration writes a close frame before returning.
    #[instrument(
        skip_all,
        name = "hub.actor.connection",
        fields(peer_id = %self.identity.peer_id, room_id = %self.room_id)
    )]
    pub async fn run<S, R>(self, mut sink: S, stream: R) -> Result<LeaveReason, HubError>
    where
        S: Sink<Frame> + Unpin + Send + 'static,
        S::Error: Display,
        R: Stream<Item = Result<Frame, TransportError>> + Unpin,
    {
        let peer_id = self.identity.peer_id.clone();
        let (outbound, queue) = mpsc::channel(self.settings.outbound_capacity);

        let registration = match self
            .hub
            .register(PeerRegistration {
                identity: self.identity.clone(),
                room_id: self.room_id.clone(),
                outbound,
            })
            .await
        {
            Ok(registration) => registration,
            Err(e) => {
                warn!(
                    target: "hub.actor.connection",
                    peer_id = %peer_id,
                    room_id = %self.room_id,
                    error = %e,
                    "Registration refused, closing connection"
                );
                let _ = write_frame(&mut sink, Frame::Close, self.settings.write_timeout).await;
                return Err(e);
            }
        };

        self.metrics.connection_opened();
        info!(
            target: "hub.actor.connection",
            peer_id = %peer_id,
            room_id = %self.room_id,
            connection_id = %registration.connection_id,
            display_name = %registration.display_name,
            "Connection started"
        );

        let writer_token = self.hub.child_token();
        let writer = tokio::spawn(write_loop(
            sink,
            queue,
            self.settings,
            writer_token.clone(),
            peer_id.clone(),
        ));

        let reason = self.read_loop(stream, &registration, &writer_token).await;

        if let Err(e) = self
            .hub
            .unregister(peer_id.clone(), Some(registration.connection_id), reason)
            .await
        {
            // Hub gone: nothing will close the queue for us
            warn!(
                target: "hub.actor.connection",
                peer_id = %peer_id,
                error = %e,
                "Unregister failed"
            );
            writer_token.cancel();
        }

        if let Err(e) = writer.await {
            warn!(
                target: "hub.actor.connection",
                peer_id = %peer_id,
                error = %e,
                "Write loop task failed"
            );
        }

        self.metrics.connection_closed();
        info!(
            target: "hub.actor.connection",
            peer_id = %peer_id,
            room_id = %self.room_id,
            connection_id = %registration.connection_id,
            reason = reason.as_str(),
            "Connection ended"
        );

        Ok(reason)
    }

    async fn read_loop<R>(
        &self,
        mut stream: R,
        registration: &Registration,
        writer_token: &CancellationToken,
    ) -> LeaveReason
    where
        R: Stream<Item = Result<Frame, TransportError>> + Unpin,
    {
        let peer_id = &self.identity.peer_id;

        loop {
            let next = tokio::select! {
                () = writer_token.cancelled() => {
                    debug!(
                        target: "hub.actor.connection",
                        peer_id = %peer_id,
                        "Write side stopped, ending read loop"
                    );
                    return LeaveReason::Disconnected;
                }
                next = tokio::time::timeout(self.settings.idle_timeout, stream.next()) => next,
            };

            let frame = match next {
                Err(_) => {
                    info!(
                        target: "hub.actor.connection",
                        peer_id = %peer_id,
                        idle_timeout_secs = self.settings.idle_timeout.as_secs(),
                        "Connection idle, closing"
                    );
                    return LeaveReason::IdleTimeout;
                }
                Ok(None) => return LeaveReason::Disconnected,
                Ok(Some(Err(e))) => {
                    debug!(
                        target: "hub.actor.connection",
                        peer_id = %peer_id,
                        error = %e,
                        "Read failed"
                    );
                    return LeaveReason::Disconnected;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                Frame::Text(text) => {
                    if let ControlFlow::Break(reason) = self.handle_text(&text, registration).await
                    {
                        return reason;
                    }
                }
                Frame::Ping(_) | Frame::Pong(_) => {
                    if self.hub.touch(peer_id.clone()).await.is_err() {
                        return LeaveReason::Disconnected;
                    }
                }
                Frame::Binary(_) => {
                    metrics::record_inbound_rejected("binary");
                    debug!(
                        target: "hub.actor.connection",
                        peer_id = %peer_id,
                        "Ignoring binary frame"
                    );
                }
                Frame::Close => return LeaveReason::Disconnected,
            }
        }
    }

    /// Decode and route one text frame.
    async fn handle_text(
        &self,
        text: &str,
        registration: &Registration,
    ) -> ControlFlow<LeaveReason> {
        let peer_id = &self.identity.peer_id;

        let mut message: SignalingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_inbound_rejected("malformed");
                debug!(
                    target: "hub.actor.connection",
                    peer_id = %peer_id,
                    error = %e,
                    "Skipping malformed frame"
                );
                return ControlFlow::Continue(());
            }
        };
        message.stamp(&self.room_id, peer_id);

        if message.kind.is_server_only() {
            metrics::record_inbound_rejected("server_only");
            debug!(
                target: "hub.actor.connection",
                peer_id = %peer_id,
                message_type = message.kind.as_str(),
                "Ignoring server-only message type from client"
            );
            return ControlFlow::Continue(());
        }

        if message.kind.is_typing() {
            if let Err(e) = message.enrich_typing(
                self.identity.user_id,
                self.identity.public_user_id,
                &registration.display_name,
            ) {
                metrics::record_inbound_rejected("invalid_payload");
                debug!(
                    target: "hub.actor.connection",
                    peer_id = %peer_id,
                    error = %e,
                    "Skipping typing indicator"
                );
                return ControlFlow::Continue(());
            }
        }

        let result = match message.kind {
            MessageType::Offer
            | MessageType::Answer
            | MessageType::IceCandidate
            | MessageType::ChatMessage
            | MessageType::ChatMessageEdit
            | MessageType::ChatMessageDelete
            | MessageType::ChatReaction
            | MessageType::ChatReadStatus
            | MessageType::ChatTyping
            | MessageType::ChatTypingStop => self.hub.dispatch(message).await.map(|_| ()),

            MessageType::Join => self.hub.send_roster(peer_id.clone()).await.map(|_| ()),

            MessageType::Leave => {
                debug!(
                    target: "hub.actor.connection",
                    peer_id = %peer_id,
                    "Client left"
                );
                return ControlFlow::Break(LeaveReason::Left);
            }

            MessageType::PeerState => match message.payload::<PeerStatePayload>() {
                Ok(payload) => self
                    .hub
                    .update_peer_state(peer_id.clone(), payload.state)
                    .await
                    .map(|_| ()),
                Err(e) => {
                    metrics::record_inbound_rejected("invalid_payload");
                    debug!(
                        target: "hub.actor.connection",
                        peer_id = %peer_id,
                        error = %e,
                        "Skipping peer-state report"
                    );
                    return ControlFlow::Continue(());
                }
            },

            // Server-only types were filtered above
            MessageType::ParticipantJoined
            | MessageType::ParticipantLeft
            | MessageType::Unknown => {
                metrics::record_inbound_rejected("unknown_type");
                return ControlFlow::Continue(());
            }
        };

        match result {
            Ok(()) => ControlFlow::Continue(()),
            Err(HubError::InvalidStateTransition { from, to }) => {
                debug!(
                    target: "hub.actor.connection",
                    peer_id = %peer_id,
                    from = %from,
                    to = %to,
                    "Peer state report rejected"
                );
                ControlFlow::Continue(())
            }
            // Evicted as a slow consumer while the roster was queued
            Err(HubError::DeadPeerConnection(_)) => ControlFlow::Break(LeaveReason::SlowConsumer),
            Err(e) if e.is_benign() => {
                debug!(
                    target: "hub.actor.connection",
                    peer_id = %peer_id,
                    error = %e,
                    "Hub request raced with unregistration"
                );
                ControlFlow::Continue(())
            }
            Err(e) => {
                warn!(
                    target: "hub.actor.connection",
                    peer_id = %peer_id,
                    error = %e,
                    "Hub unavailable, closing connection"
                );
                ControlFlow::Break(LeaveReason::Disconnected)
            }
        }
    }
}

/// Drain the outbound queue to the transport and send keepalive pings.
///
/// Writes a close frame and exits once the hub closes the queue. Cancels
/// `token` on exit for either reason so the read loop ends too.
async fn write_loop<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Arc<SignalingMessage>>,
    settings: ConnectionSettings,
    token: CancellationToken,
    peer_id: PeerId,
) where
    S: Sink<Frame> + Unpin,
    S::Error: Display,
{
    let mailbox = MailboxMonitor::new(ActorType::Connection, peer_id.as_str());
    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );

    loop {
        tokio::select! {
            () = token.cancelled() => break,

            queued = queue.recv() => {
                let Some(message) = queued else {
                    // Unregistered by the hub: stop reading on its behalf
                    let _ = write_frame(&mut sink, Frame::Close, settings.write_timeout).await;
                    token.cancel();
                    break;
                };
                mailbox.observe_depth(queue.len());

                let text = match serde_json::to_string(message.as_ref()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(
                            target: "hub.actor.connection",
                            peer_id = %peer_id,
                            error = %e,
                            "Failed to encode outbound message"
                        );
                        continue;
                    }
                };
                if let Err(e) = write_frame(&mut sink, Frame::Text(text), settings.write_timeout).await {
                    debug!(
                        target: "hub.actor.connection",
                        peer_id = %peer_id,
                        error = %e,
                        "Write failed"
                    );
                    token.cancel();
                    break;
                }
            }

            _ = ping.tick() => {
                if let Err(e) = write_frame(&mut sink, Frame::Ping(Vec::new()), settings.write_timeout).await {
                    debug!(
                        target: "hub.actor.connection",
                        peer_id = %peer_id,
                        error = %e,
                        "Keepalive ping failed"
                    );
                    token.cancel();
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(settings.write_timeout, sink.close()).await;
}

async fn write_frame<S>(sink: &mut S, frame: Frame, timeout: Duration) -> Result<(), TransportError>
where
    S: Sink<Frame> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TransportError::Io(e.to_string())),
        Err(_) => Err(TransportError::Io(format!(
            "write timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::channel::mpsc as duplex;

    struct Client {
        to_server: duplex::UnboundedSender<Result<Frame, TransportError>>,
        from_server: duplex::UnboundedReceiver<Frame>,
    }

    fn spawn_connection(
        hub: &SignalingHubHandle,
        peer: &str,
        settings: ConnectionSettings,
    ) -> (Client, tokio::task::JoinHandle<Result<LeaveReason, HubError>>) {
        let (to_server, server_rx) = duplex::unbounded();
        let (server_tx, from_server) = duplex::unbounded();
        let actor = ConnectionActor::new(
            hub.clone(),
            ActorMetrics::new(),
            PeerIdentity::new(PeerId::from(peer), peer),
            RoomId::from("m1"),
            settings,
        );
        let task = tokio::spawn(actor.run(server_tx, server_rx));
        (
            Client {
                to_server,
                from_server,
            },
            task,
        )
    }

    async fn wait_for_peers(hub: &SignalingHubHandle, expected: usize) {
        let mut count = 0;
        for _ in 0..100 {
            count = hub.peer_count(RoomId::from("m1")).await.unwrap();
            if count == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(count, expected, "room never reached {expected} peers");
    }

    fn text(json: serde_json::Value) -> Result<Frame, TransportError> {
        Ok(Frame::Text(json.to_string()))
    }

    #[tokio::test]
    async fn test_leave_ends_connection_and_closes() {
        let hub = SignalingHubHandle::new("hub-test".to_string(), ActorMetrics::new(), None);
        let (mut client, task) = spawn_connection(&hub, "u1", ConnectionSettings::default());
        wait_for_peers(&hub, 1).await;

        client
            .to_server
            .unbounded_send(text(serde_json::json!({ "type": "leave" })))
            .unwrap();

        assert_eq!(task.await.unwrap().unwrap(), LeaveReason::Left);
        assert_eq!(client.from_server.next().await, Some(Frame::Close));
        assert_eq!(hub.peer_count(RoomId::from("m1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_relays_offer_with_stamped_sender() {
        let hub = SignalingHubHandle::new("hub-test".to_string(), ActorMetrics::new(), None);
        let (c1, _t1) = spawn_connection(&hub, "u1", ConnectionSettings::default());
        wait_for_peers(&hub, 1).await;
        let (mut c2, _t2) = spawn_connection(&hub, "u2", ConnectionSettings::default());
        wait_for_peers(&hub, 2).await;

        c1.to_server
            .unbounded_send(text(serde_json::json!({
                "type": "offer",
                "from": "spoofed",
                "to": "u2",
                "data": { "sdp": "v=0" }
            })))
            .unwrap();

        let frame = c2.from_server.next().await;
        let Some(Frame::Text(raw)) = frame else {
            unreachable!("expected text frame, got {frame:?}");
        };
        let received: SignalingMessage = serde_json::from_str(&raw).unwrap();
        assert_eq!(received.kind, MessageType::Offer);
        assert_eq!(received.from.as_str(), "u1");
        assert_eq!(received.room_id.as_str(), "m1");
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let hub = SignalingHubHandle::new("hub-test".to_string(), ActorMetrics::new(), None);
        let (client, task) = spawn_connection(&hub, "u1", ConnectionSettings::default());
        wait_for_peers(&hub, 1).await;

        client
            .to_server
            .unbounded_send(Ok(Frame::Text("{not json".to_string())))
            .unwrap();
        client
            .to_server
            .unbounded_send(text(serde_json::json!({ "type": "participant-joined" })))
            .unwrap();
        client
            .to_server
            .unbounded_send(text(serde_json::json!({ "type": "screen-share" })))
            .unwrap();
        wait_for_peers(&hub, 1).await;
        assert!(!task.is_finished());

        drop(client);
        assert_eq!(task.await.unwrap().unwrap(), LeaveReason::Disconnected);
    }

    #[tokio::test]
    async fn test_client_presence_dropped_and_typing_enriched() {
        let hub = SignalingHubHandle::new("hub-test".to_string(), ActorMetrics::new(), None);
        let (mut c1, _t1) = spawn_connection(&hub, "u1", ConnectionSettings::default());
        wait_for_peers(&hub, 1).await;
        let (c2, _t2) = spawn_connection(&hub, "u2", ConnectionSettings::default());
        wait_for_peers(&hub, 2).await;

        let Some(Frame::Text(joined)) = c1.from_server.next().await else {
            unreachable!("expected participant-joined for u2");
        };
        assert!(joined.contains("participant-joined"));

        c2.to_server
            .unbounded_send(text(serde_json::json!({
                "type": "participant-left",
                "data": { "participantId": "u1" }
            })))
            .unwrap();
        c2.to_server
            .unbounded_send(text(serde_json::json!({ "type": "chat-typing-stop" })))
            .unwrap();

        // The forged presence event never reaches u1; the typing stop does
        let Some(Frame::Text(relayed)) = c1.from_server.next().await else {
            unreachable!("expected a relayed text frame");
        };
        let relayed: SignalingMessage = serde_json::from_str(&relayed).unwrap();
        assert_eq!(relayed.kind, MessageType::ChatTypingStop);
        assert_eq!(relayed.data["userName"], "u2");
        assert_eq!(hub.peer_count(RoomId::from("m1")).await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let hub = SignalingHubHandle::new("hub-test".to_string(), ActorMetrics::new(), None);
        let settings = ConnectionSettings {
            ping_interval: Duration::from_secs(54),
            idle_timeout: Duration::from_secs(60),
            ..ConnectionSettings::default()
        };
        let (_client, task) = spawn_connection(&hub, "u1", settings);

        assert_eq!(task.await.unwrap().unwrap(), LeaveReason::IdleTimeout);
        assert_eq!(hub.peer_count(RoomId::from("m1")).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ping_sent() {
        let hub = SignalingHubHandle::new("hub-test".to_string(), ActorMetrics::new(), None);
        let settings = ConnectionSettings {
            ping_interval: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            ..ConnectionSettings::default()
        };
        let (mut client, _task) = spawn_connection(&hub, "u1", settings);

        assert_eq!(client.from_server.next().await, Some(Frame::Ping(Vec::new())));
    }

    #[tokio::test]
    async fn test_refused_registration_closes() {
        let hub = SignalingHubHandle::new("hub-test".to_string(), ActorMetrics::new(), None);
        hub.shutdown().await.unwrap();

        let (mut client, task) = spawn_connection(&hub, "u1", ConnectionSettings::default());
        assert!(matches!(task.await.unwrap(), Err(HubError::ShuttingDown)));
        assert_eq!(client.from_server.next().await, Some(Frame::Close));
    }
}
