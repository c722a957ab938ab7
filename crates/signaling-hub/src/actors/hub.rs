//! `SignalingHub` - singleton owner of the peer/room registry.
//!
//! Every registry mutation and query goes through the hub's mailbox and is
//! applied by one task in arrival order. The hub never awaits peer or storage
//! I/O: outbound delivery uses `try_send` on each peer's bounded queue and
//! storage updates are handed to the [`MirrorHandle`].
//!
//! # Delivery
//!
//! A peer whose queue is full or closed is dead
//! ([`HubError::DeadPeerConnection`]). Dead peers are evicted after the
//! fan-out that found them, and their departure is broadcast to the room.
//! Dropping the hub's sender closes the queue, so an evicted peer receives
//! nothing dispatched after its removal.
//!
//! # Presence
//!
//! Every `participant-joined` broadcast for a registration is matched by one
//! `participant-left` when that registration ends, whatever the reason.
//!
//! # Graceful Shutdown
//!
//! `Shutdown` (or cancellation):
//! 1. Sets `accepting_new = false`
//! 2. Unregisters every peer, closing their outbound queues
//! 3. Keeps answering queries until every handle is dropped

use crate::errors::HubError;
use crate::model::{resolve_display_name, Peer, PeerState, Room, RoomStats, StateChange};
use crate::observability::metrics;
use crate::signaling::SignalingMessage;
use crate::storage::{MirrorHandle, MirrorOp};

use super::messages::{
    ConnectionId, DispatchOutcome, HubMessage, HubStatus, LeaveReason, OutboundSender,
    PeerRegistration, Registration, SweepReport,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use chrono::Utc;
use common::types::{PeerId, RoomId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer size for the hub mailbox.
const HUB_CHANNEL_BUFFER: usize = 1000;

/// Minimum time between storage refreshes caused by activity alone.
const MIRROR_TOUCH_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to the `SignalingHub`.
///
/// Cheap to clone. All methods are async and return results via oneshot
/// channels. A hub that has stopped reports `HubError::Internal`.
#[derive(Clone)]
pub struct SignalingHubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
}

impl SignalingHubHandle {
    /// Spawn the hub and return a handle to it.
    #[must_use]
    pub fn new(hub_id: String, metrics: Arc<ActorMetrics>, mirror: Option<MirrorHandle>) -> Self {
        Self::spawn(hub_id, metrics, mirror).0
    }

    /// Spawn the hub and return a handle plus the task's join handle.
    ///
    /// The task ends once every handle is dropped or the hub is cancelled.
    #[must_use]
    pub fn spawn(
        hub_id: String,
        metrics: Arc<ActorMetrics>,
        mirror: Option<MirrorHandle>,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SignalingHub::new(hub_id, receiver, cancel_token.clone(), metrics, mirror);
        let task = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            task,
        )
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubMessage,
    ) -> Result<T, HubError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| HubError::Internal(format!("response receive failed: {e}")))
    }

    /// Register a connection. Evicts a live connection with the same peer ID first.
    pub async fn register(&self, registration: PeerRegistration) -> Result<Registration, HubError> {
        self.request(|respond_to| HubMessage::Register {
            registration,
            respond_to,
        })
        .await?
    }

    /// Unregister a peer. With `connection_id`, only that registration is removed.
    ///
    /// Returns whether a peer was removed.
    pub async fn unregister(
        &self,
        peer_id: PeerId,
        connection_id: Option<ConnectionId>,
        reason: LeaveReason,
    ) -> Result<bool, HubError> {
        self.request(|respond_to| HubMessage::Unregister {
            peer_id,
            connection_id,
            reason,
            respond_to,
        })
        .await
    }

    /// Route a message to its target, or to every other member of its room.
    pub async fn dispatch(&self, message: SignalingMessage) -> Result<DispatchOutcome, HubError> {
        self.request(|respond_to| HubMessage::Dispatch {
            message,
            respond_to,
        })
        .await
    }

    /// Send the current room roster to `peer_id`.
    pub async fn send_roster(&self, peer_id: PeerId) -> Result<usize, HubError> {
        self.request(|respond_to| HubMessage::SendRoster {
            peer_id,
            respond_to,
        })
        .await?
    }

    /// Apply a connection state update.
    ///
    /// Returns the previous state, `None` for unknown peers, or
    /// `InvalidStateTransition` when the update is not allowed.
    pub async fn update_peer_state(
        &self,
        peer_id: PeerId,
        state: PeerState,
    ) -> Result<Option<PeerState>, HubError> {
        self.request(|respond_to| HubMessage::UpdatePeerState {
            peer_id,
            state,
            respond_to,
        })
        .await?
    }

    /// Refresh a peer's activity without waiting for the hub.
    pub async fn touch(&self, peer_id: PeerId) -> Result<(), HubError> {
        self.sender
            .send(HubMessage::Touch { peer_id })
            .await
            .map_err(|e| HubError::Internal(format!("channel send failed: {e}")))
    }

    /// Peers of a room, oldest first.
    pub async fn list_peers(&self, room_id: RoomId) -> Result<Vec<Peer>, HubError> {
        self.request(|respond_to| HubMessage::ListPeers {
            room_id,
            respond_to,
        })
        .await
    }

    /// Number of peers in a room.
    pub async fn peer_count(&self, room_id: RoomId) -> Result<usize, HubError> {
        self.request(|respond_to| HubMessage::PeerCount {
            room_id,
            respond_to,
        })
        .await
    }

    /// Whether a room has at least one peer.
    pub async fn is_room_active(&self, room_id: RoomId) -> Result<bool, HubError> {
        self.request(|respond_to| HubMessage::IsRoomActive {
            room_id,
            respond_to,
        })
        .await
    }

    /// Look up a registered peer.
    pub async fn get_peer(&self, peer_id: PeerId) -> Result<Option<Peer>, HubError> {
        self.request(|respond_to| HubMessage::GetPeer {
            peer_id,
            respond_to,
        })
        .await
    }

    /// Statistics for a room, `None` if it has no peers.
    pub async fn room_stats(&self, room_id: RoomId) -> Result<Option<RoomStats>, HubError> {
        self.request(|respond_to| HubMessage::RoomStats {
            room_id,
            respond_to,
        })
        .await
    }

    /// Evict peers idle for longer than `threshold` and drop inactive rooms.
    pub async fn sweep_inactive(&self, threshold: Duration) -> Result<SweepReport, HubError> {
        self.request(|respond_to| HubMessage::SweepInactive {
            threshold,
            respond_to,
        })
        .await
    }

    /// Current hub status.
    pub async fn get_status(&self) -> Result<HubStatus, HubError> {
        self.request(|respond_to| HubMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting registrations and unregister every peer.
    ///
    /// Returns the number of peers unregistered.
    pub async fn shutdown(&self) -> Result<usize, HubError> {
        self.request(|respond_to| HubMessage::Shutdown { respond_to })
            .await
    }

    /// Cancel the hub (immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the hub is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that must stop with the hub.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Registry entry for one live connection.
struct ConnectedPeer {
    room_id: RoomId,
    connection_id: ConnectionId,
    outbound: OutboundSender,
    avatar_url: Option<String>,
    last_mirrored: Instant,
}

/// The `SignalingHub` implementation.
pub struct SignalingHub {
    hub_id: String,
    receiver: mpsc::Receiver<HubMessage>,
    cancel_token: CancellationToken,
    /// Live connections by peer ID. At most one per ID.
    clients: HashMap<PeerId, ConnectedPeer>,
    /// Non-empty rooms by ID.
    rooms: HashMap<RoomId, Room>,
    next_connection_id: u64,
    accepting_new: bool,
    mirror: Option<MirrorHandle>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SignalingHub {
    fn new(
        hub_id: String,
        receiver: mpsc::Receiver<HubMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
        mirror: Option<MirrorHandle>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Hub, &hub_id);

        Self {
            hub_id,
            receiver,
            cancel_token,
            clients: HashMap::new(),
            rooms: HashMap::new(),
            next_connection_id: 0,
            accepting_new: true,
            mirror,
            metrics,
            mailbox,
        }
    }

    /// Run the hub message loop.
    #[instrument(skip_all, name = "hub.actor.hub", fields(hub_id = %self.hub_id))]
    async fn run(mut self) {
        info!(
            target: "hub.actor.hub",
            hub_id = %self.hub_id,
            mirrored = self.mirror.is_some(),
            "SignalingHub started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "hub.actor.hub",
                        hub_id = %self.hub_id,
                        "SignalingHub received cancellation signal"
                    );
                    self.shutdown_all();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message);
                            self.mailbox.observe_depth(self.receiver.len());
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "hub.actor.hub",
                                hub_id = %self.hub_id,
                                "SignalingHub channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "hub.actor.hub",
            hub_id = %self.hub_id,
            peers_remaining = self.clients.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SignalingHub stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register {
                registration,
                respond_to,
            } => {
                let result = self.register(registration);
                let _ = respond_to.send(result);
            }

            HubMessage::Unregister {
                peer_id,
                connection_id,
                reason,
                respond_to,
            } => {
                let removed = self.remove_and_announce(&peer_id, connection_id, reason);
                let _ = respond_to.send(removed);
            }

            HubMessage::Dispatch {
                message,
                respond_to,
            } => {
                let outcome = self.dispatch(message);
                let _ = respond_to.send(outcome);
            }

            HubMessage::SendRoster {
                peer_id,
                respond_to,
            } => {
                let result = self.send_roster(&peer_id);
                let _ = respond_to.send(result);
            }

            HubMessage::UpdatePeerState {
                peer_id,
                state,
                respond_to,
            } => {
                let result = self.update_peer_state(&peer_id, state);
                let _ = respond_to.send(result);
            }

            HubMessage::Touch { peer_id } => {
                self.touch(&peer_id);
            }

            HubMessage::ListPeers {
                room_id,
                respond_to,
            } => {
                let mut peers: Vec<Peer> = self
                    .rooms
                    .get(&room_id)
                    .map(|room| room.peers().cloned().collect())
                    .unwrap_or_default();
                peers.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
                let _ = respond_to.send(peers);
            }

            HubMessage::PeerCount {
                room_id,
                respond_to,
            } => {
                let count = self.rooms.get(&room_id).map_or(0, Room::peer_count);
                let _ = respond_to.send(count);
            }

            HubMessage::IsRoomActive {
                room_id,
                respond_to,
            } => {
                let active = self.rooms.get(&room_id).is_some_and(|room| !room.is_empty());
                let _ = respond_to.send(active);
            }

            HubMessage::GetPeer {
                peer_id,
                respond_to,
            } => {
                let peer = self
                    .clients
                    .get(&peer_id)
                    .and_then(|client| self.rooms.get(&client.room_id))
                    .and_then(|room| room.peer(&peer_id))
                    .cloned();
                let _ = respond_to.send(peer);
            }

            HubMessage::RoomStats {
                room_id,
                respond_to,
            } => {
                let stats = self.rooms.get(&room_id).map(Room::stats);
                let _ = respond_to.send(stats);
            }

            HubMessage::SweepInactive {
                threshold,
                respond_to,
            } => {
                let report = self.sweep_inactive(threshold);
                let _ = respond_to.send(report);
            }

            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            HubMessage::Shutdown { respond_to } => {
                let removed = self.shutdown_all();
                let _ = respond_to.send(removed);
            }
        }
    }

    fn register(&mut self, registration: PeerRegistration) -> Result<Registration, HubError> {
        if !self.accepting_new {
            metrics::record_registration("refused");
            return Err(HubError::ShuttingDown);
        }

        let PeerRegistration {
            identity,
            room_id,
            outbound,
        } = registration;
        let peer_id = identity.peer_id.clone();

        if peer_id.is_empty() || room_id.is_empty() {
            metrics::record_registration("refused");
            return Err(HubError::Protocol(
                "registration requires a peer id and a room id".to_string(),
            ));
        }

        let replaced_existing = self.clients.contains_key(&peer_id);
        if replaced_existing {
            let duplicate = HubError::DuplicateRegistration(peer_id.to_string());
            info!(
                target: "hub.actor.hub",
                peer_id = %peer_id,
                room_id = %room_id,
                reason = %duplicate,
                "Evicting existing connection for re-registered peer"
            );
            self.remove_and_announce(&peer_id, None, LeaveReason::Replaced);
        }

        let display_name = resolve_display_name(&peer_id, &identity.display_name);
        let peer = Peer::new(&identity, room_id.clone(), display_name.clone());

        self.next_connection_id += 1;
        let connection_id = ConnectionId(self.next_connection_id);

        let new_room = !self.rooms.contains_key(&room_id);
        let room = self
            .rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id.clone()));
        room.add_peer(peer.clone());
        if new_room {
            let room = room.clone();
            self.mirror(MirrorOp::SaveRoom { room });
        }

        self.clients.insert(
            peer_id.clone(),
            ConnectedPeer {
                room_id: room_id.clone(),
                connection_id,
                outbound,
                avatar_url: identity.avatar_url.clone(),
                last_mirrored: Instant::now(),
            },
        );
        self.mirror(MirrorOp::SavePeer {
            room_id: room_id.clone(),
            peer: peer.clone(),
        });

        metrics::record_registration(if replaced_existing { "replaced" } else { "new" });
        info!(
            target: "hub.actor.hub",
            peer_id = %peer_id,
            room_id = %room_id,
            connection_id = %connection_id,
            authenticated = peer.is_authenticated,
            room_size = self.rooms.get(&room_id).map_or(0, Room::peer_count),
            "Peer registered"
        );

        let joined = Arc::new(SignalingMessage::participant_joined(
            &peer,
            identity.avatar_url.as_deref(),
        ));
        let (_, dead) = self.fan_out(&room_id, &joined, Some(&peer_id));
        self.evict_dead(dead);

        self.publish_gauges();

        Ok(Registration {
            connection_id,
            display_name,
            replaced_existing,
        })
    }

    /// Remove a peer and announce the departure, then evict any peer the
    /// announcement found dead, until no dead peers remain.
    fn remove_and_announce(
        &mut self,
        peer_id: &PeerId,
        connection_id: Option<ConnectionId>,
        reason: LeaveReason,
    ) -> bool {
        let mut dead = VecDeque::new();
        let removed = self.remove_one(peer_id, connection_id, reason, &mut dead);
        while let Some(next) = dead.pop_front() {
            self.remove_one(&next, None, LeaveReason::SlowConsumer, &mut dead);
        }
        self.publish_gauges();
        removed
    }

    fn evict_dead(&mut self, dead: Vec<PeerId>) {
        for peer_id in dead {
            self.remove_and_announce(&peer_id, None, LeaveReason::SlowConsumer);
        }
    }

    fn remove_one(
        &mut self,
        peer_id: &PeerId,
        connection_id: Option<ConnectionId>,
        reason: LeaveReason,
        dead: &mut VecDeque<PeerId>,
    ) -> bool {
        match self.clients.get(peer_id) {
            None => {
                debug!(
                    target: "hub.actor.hub",
                    peer_id = %peer_id,
                    reason = reason.as_str(),
                    "Unregister for unknown peer ignored"
                );
                return false;
            }
            Some(client) if connection_id.is_some_and(|id| id != client.connection_id) => {
                debug!(
                    target: "hub.actor.hub",
                    peer_id = %peer_id,
                    stale_connection = ?connection_id,
                    current_connection = %client.connection_id,
                    "Unregister from replaced connection ignored"
                );
                return false;
            }
            Some(_) => {}
        }

        let Some(client) = self.clients.remove(peer_id) else {
            return false;
        };
        // Dropping the only sender closes the peer's queue
        drop(client.outbound);

        let room_id = client.room_id;
        let mut room_emptied = false;
        if let Some(room) = self.rooms.get_mut(&room_id) {
            if let Some(mut peer) = room.remove_peer(peer_id) {
                peer.state = PeerState::Closed;
            }
            room_emptied = room.is_empty();
        }

        if room_emptied {
            self.rooms.remove(&room_id);
            self.mirror(MirrorOp::DeleteRoom {
                room_id: room_id.clone(),
            });
        } else {
            self.mirror(MirrorOp::RemovePeer {
                room_id: room_id.clone(),
                peer_id: peer_id.clone(),
            });
        }

        if reason.is_eviction() {
            self.metrics.record_eviction();
        }
        metrics::record_peer_removed(reason.as_str());

        info!(
            target: "hub.actor.hub",
            peer_id = %peer_id,
            room_id = %room_id,
            connection_id = %client.connection_id,
            reason = reason.as_str(),
            room_removed = room_emptied,
            "Peer unregistered"
        );

        if !room_emptied {
            let left = Arc::new(SignalingMessage::participant_left(
                room_id.clone(),
                peer_id.clone(),
            ));
            let (_, newly_dead) = self.fan_out(&room_id, &left, None);
            dead.extend(newly_dead);
        }

        true
    }

    fn dispatch(&mut self, message: SignalingMessage) -> DispatchOutcome {
        let started = std::time::Instant::now();

        if !message.from.is_empty() {
            let in_room = self
                .clients
                .get(&message.from)
                .is_some_and(|client| client.room_id == message.room_id);
            if !in_room {
                debug!(
                    target: "hub.actor.hub",
                    from = %message.from,
                    room_id = %message.room_id,
                    message_type = message.kind.as_str(),
                    "Dropping message from peer not registered in room"
                );
                return DispatchOutcome::default();
            }
            let from = message.from.clone();
            self.touch(&from);
        }

        let kind = message.kind;
        let message = Arc::new(message);

        let (delivered, dead) = match &message.to {
            Some(target) => match self.clients.get(target) {
                Some(client) if client.room_id == message.room_id => {
                    match try_deliver(target, client, &message) {
                        Ok(()) => (1, Vec::new()),
                        Err(_) => (0, vec![target.clone()]),
                    }
                }
                _ => {
                    debug!(
                        target: "hub.actor.hub",
                        to = %target,
                        room_id = %message.room_id,
                        message_type = kind.as_str(),
                        "Target peer not in room, message dropped"
                    );
                    (0, Vec::new())
                }
            },
            None => {
                let exclude = (!message.from.is_empty()).then_some(&message.from);
                self.fan_out(&message.room_id, &message, exclude)
            }
        };

        let outcome = DispatchOutcome {
            delivered,
            evicted: dead.clone(),
        };
        self.evict_dead(dead);

        metrics::record_dispatch(kind.as_str(), delivered, started.elapsed());
        outcome
    }

    /// Queue `message` for every room member except `exclude`.
    ///
    /// Returns the delivered count and the peers whose queues are dead.
    fn fan_out(
        &self,
        room_id: &RoomId,
        message: &Arc<SignalingMessage>,
        exclude: Option<&PeerId>,
    ) -> (usize, Vec<PeerId>) {
        let Some(room) = self.rooms.get(room_id) else {
            return (0, Vec::new());
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for peer_id in room.peer_ids() {
            if exclude == Some(&peer_id) {
                continue;
            }
            let Some(client) = self.clients.get(&peer_id) else {
                continue;
            };
            match try_deliver(&peer_id, client, message) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(peer_id),
            }
        }
        (delivered, dead)
    }

    fn send_roster(&mut self, peer_id: &PeerId) -> Result<usize, HubError> {
        let Some(client) = self.clients.get(peer_id) else {
            return Err(HubError::PeerNotFound(peer_id.to_string()));
        };
        let Some(room) = self.rooms.get(&client.room_id) else {
            return Err(HubError::RoomNotFound(client.room_id.to_string()));
        };

        let mut others: Vec<&Peer> = room.peers().filter(|p| &p.id != peer_id).collect();
        others.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));

        let mut sent = 0;
        let mut failure = None;
        for other in others {
            let avatar = self
                .clients
                .get(&other.id)
                .and_then(|c| c.avatar_url.as_deref());
            let entry = Arc::new(
                SignalingMessage::participant_joined(other, avatar).to_peer(peer_id.clone()),
            );
            if let Err(e) = try_deliver(peer_id, client, &entry) {
                failure = Some(e);
                break;
            }
            sent += 1;
        }

        if let Some(e) = failure {
            self.remove_and_announce(peer_id, None, LeaveReason::SlowConsumer);
            return Err(e);
        }

        debug!(
            target: "hub.actor.hub",
            peer_id = %peer_id,
            entries = sent,
            "Roster sent"
        );
        Ok(sent)
    }

    fn update_peer_state(
        &mut self,
        peer_id: &PeerId,
        state: PeerState,
    ) -> Result<Option<PeerState>, HubError> {
        let Some(room_id) = self.clients.get(peer_id).map(|c| c.room_id.clone()) else {
            return Ok(None);
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return Ok(None);
        };

        match room.update_peer_state(peer_id, state) {
            StateChange::Applied { from, to } => {
                debug!(
                    target: "hub.actor.hub",
                    peer_id = %peer_id,
                    from = %from,
                    to = %to,
                    "Peer state changed"
                );
                self.mirror_peer(&room_id, peer_id);
                Ok(Some(from))
            }
            StateChange::Unchanged(current) => {
                self.mirror_peer_if_due(&room_id, peer_id);
                Ok(Some(current))
            }
            StateChange::Rejected { from, to } => {
                metrics::record_state_transition_rejected();
                debug!(
                    target: "hub.actor.hub",
                    peer_id = %peer_id,
                    from = %from,
                    to = %to,
                    "Peer state transition rejected"
                );
                Err(HubError::InvalidStateTransition { from, to })
            }
            StateChange::NotFound => Ok(None),
        }
    }

    fn touch(&mut self, peer_id: &PeerId) {
        let Some(room_id) = self.clients.get(peer_id).map(|c| c.room_id.clone()) else {
            return;
        };
        let touched = self
            .rooms
            .get_mut(&room_id)
            .is_some_and(|room| room.touch_peer(peer_id));
        if touched {
            self.mirror_peer_if_due(&room_id, peer_id);
        }
    }

    fn sweep_inactive(&mut self, threshold: Duration) -> SweepReport {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let rooms_before = self.rooms.len();

        let stale: Vec<PeerId> = self
            .rooms
            .values()
            .flat_map(|room| room.stale_peers(threshold, now))
            .collect();

        let mut peers_removed = 0;
        for peer_id in &stale {
            if self.remove_and_announce(peer_id, None, LeaveReason::Reaped) {
                peers_removed += 1;
            }
        }

        // Rooms without live connections (should not exist, but never leak them)
        let orphaned: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.is_empty() || room.is_inactive(threshold, now))
            .filter(|(_, room)| room.peers().all(|p| !self.clients.contains_key(&p.id)))
            .map(|(id, _)| id.clone())
            .collect();
        for room_id in orphaned {
            self.rooms.remove(&room_id);
            self.mirror(MirrorOp::DeleteRoom { room_id });
        }

        self.publish_gauges();

        let report = SweepReport {
            rooms_removed: rooms_before.saturating_sub(self.rooms.len()),
            peers_removed,
        };
        if report.rooms_removed > 0 || report.peers_removed > 0 {
            info!(
                target: "hub.actor.hub",
                rooms_removed = report.rooms_removed,
                peers_removed = report.peers_removed,
                "Inactivity sweep removed state"
            );
        }
        report
    }

    fn get_status(&self) -> HubStatus {
        HubStatus {
            rooms: self.rooms.len(),
            peers: self.clients.len(),
            accepting_new: self.accepting_new,
            messages_processed: self.mailbox.messages_processed(),
            mailbox_depth: self.receiver.len(),
        }
    }

    /// Stop accepting registrations and drop every connection.
    ///
    /// No presence is broadcast: every member is leaving.
    fn shutdown_all(&mut self) -> usize {
        self.accepting_new = false;
        let removed = self.clients.len();

        for (peer_id, client) in self.clients.drain() {
            debug!(
                target: "hub.actor.hub",
                peer_id = %peer_id,
                connection_id = %client.connection_id,
                "Closing connection for shutdown"
            );
            metrics::record_peer_removed(LeaveReason::Shutdown.as_str());
        }

        let room_ids: Vec<RoomId> = self.rooms.drain().map(|(id, _)| id).collect();
        for room_id in room_ids {
            self.mirror(MirrorOp::DeleteRoom { room_id });
        }

        self.publish_gauges();
        info!(
            target: "hub.actor.hub",
            hub_id = %self.hub_id,
            peers_removed = removed,
            "SignalingHub shut down registry"
        );
        removed
    }

    fn mirror(&self, op: MirrorOp) {
        if let Some(mirror) = &self.mirror {
            mirror.submit(op);
        }
    }

    fn mirror_peer(&mut self, room_id: &RoomId, peer_id: &PeerId) {
        if self.mirror.is_none() {
            return;
        }
        let Some(peer) = self.rooms.get(room_id).and_then(|r| r.peer(peer_id)).cloned() else {
            return;
        };
        if let Some(client) = self.clients.get_mut(peer_id) {
            client.last_mirrored = Instant::now();
        }
        self.mirror(MirrorOp::SavePeer {
            room_id: room_id.clone(),
            peer,
        });
    }

    fn mirror_peer_if_due(&mut self, room_id: &RoomId, peer_id: &PeerId) {
        let due = self
            .clients
            .get(peer_id)
            .is_some_and(|c| c.last_mirrored.elapsed() >= MIRROR_TOUCH_INTERVAL);
        if due {
            self.mirror_peer(room_id, peer_id);
        }
    }

    fn publish_gauges(&self) {
        metrics::set_peers_active(self.clients.len());
        metrics::set_rooms_active(self.rooms.len());
    }
}

/// Place `message` on one peer's queue without waiting.
fn try_deliver(
    peer_id: &PeerId,
    client: &ConnectedPeer,
    message: &Arc<SignalingMessage>,
) -> Result<(), HubError> {
    client
        .outbound
        .try_send(Arc::clone(message))
        .map_err(|e| {
            let state = match e {
                mpsc::error::TrySendError::Full(_) => "full",
                mpsc::error::TrySendError::Closed(_) => "closed",
            };
            warn!(
                target: "hub.actor.hub",
                peer_id = %peer_id,
                room_id = %client.room_id,
                queue = state,
                message_type = message.kind.as_str(),
                "Outbound queue unavailable, evicting peer"
            );
            HubError::DeadPeerConnection(peer_id.to_string())
        })
}
