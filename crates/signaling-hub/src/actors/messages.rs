//! Message types for actor communication.
//!
//! All communication with the hub uses strongly-typed messages over
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use crate::errors::HubError;
use crate::identity::PeerIdentity;
use crate::model::{Peer, PeerState, RoomStats};
use crate::signaling::SignalingMessage;
use common::types::{PeerId, RoomId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Outbound queue from the hub to one connection.
pub type OutboundSender = mpsc::Sender<Arc<SignalingMessage>>;

/// Generation of one registration of a peer ID.
///
/// Each successful registration gets a fresh, increasing value. Conditional
/// unregistration compares it so a replaced connection cannot remove its
/// successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection asking to join a room.
#[derive(Debug)]
pub struct PeerRegistration {
    pub identity: PeerIdentity,
    pub room_id: RoomId,
    pub outbound: OutboundSender,
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub connection_id: ConnectionId,
    /// Name shown to other participants, after placeholder resolution.
    pub display_name: String,
    /// True when an existing connection with the same peer ID was evicted.
    pub replaced_existing: bool,
}

/// Why a peer left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    /// Client sent `leave`.
    Left,
    /// Transport closed or failed.
    Disconnected,
    /// No inbound frame within the idle timeout.
    IdleTimeout,
    /// A new connection registered the same peer ID.
    Replaced,
    /// Outbound queue overflowed or was closed.
    SlowConsumer,
    /// Removed by the inactivity sweep.
    Reaped,
    /// Hub shutdown.
    Shutdown,
}

impl LeaveReason {
    /// Returns the reason as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Left => "left",
            LeaveReason::Disconnected => "disconnected",
            LeaveReason::IdleTimeout => "idle_timeout",
            LeaveReason::Replaced => "replaced",
            LeaveReason::SlowConsumer => "slow_consumer",
            LeaveReason::Reaped => "reaped",
            LeaveReason::Shutdown => "shutdown",
        }
    }

    /// True when the hub removed the peer rather than the peer leaving.
    #[must_use]
    pub const fn is_eviction(&self) -> bool {
        matches!(
            self,
            LeaveReason::Replaced | LeaveReason::SlowConsumer | LeaveReason::Reaped
        )
    }
}

/// Result of dispatching one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Number of queues the message was placed on.
    pub delivered: usize,
    /// Peers evicted because their queue was full or closed.
    pub evicted: Vec<PeerId>,
}

/// Result of an in-memory inactivity sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rooms_removed: usize,
    pub peers_removed: usize,
}

/// Hub status for the health surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStatus {
    pub rooms: usize,
    pub peers: usize,
    pub accepting_new: bool,
    pub messages_processed: u64,
    pub mailbox_depth: usize,
}

/// Messages sent to the `SignalingHub`.
#[derive(Debug)]
pub enum HubMessage {
    /// Admit a connection, evicting any live connection with the same peer ID.
    Register {
        registration: PeerRegistration,
        respond_to: oneshot::Sender<Result<Registration, HubError>>,
    },

    /// Remove a peer. With `connection_id`, only that generation is removed.
    Unregister {
        peer_id: PeerId,
        connection_id: Option<ConnectionId>,
        reason: LeaveReason,
        /// Returns whether a peer was removed.
        respond_to: oneshot::Sender<bool>,
    },

    /// Route a message to its target or broadcast it to the room.
    Dispatch {
        message: SignalingMessage,
        respond_to: oneshot::Sender<DispatchOutcome>,
    },

    /// Queue one `participant-joined` per other room member to `peer_id`.
    SendRoster {
        peer_id: PeerId,
        /// Returns the number of roster entries queued.
        respond_to: oneshot::Sender<Result<usize, HubError>>,
    },

    /// Apply a client-reported connection state.
    UpdatePeerState {
        peer_id: PeerId,
        state: PeerState,
        /// `Ok(None)` when the peer is unknown; otherwise the previous state.
        respond_to: oneshot::Sender<Result<Option<PeerState>, HubError>>,
    },

    /// Refresh a peer's activity (keepalive). Fire-and-forget.
    Touch { peer_id: PeerId },

    /// List the peers of a room.
    ListPeers {
        room_id: RoomId,
        respond_to: oneshot::Sender<Vec<Peer>>,
    },

    /// Count the peers of a room.
    PeerCount {
        room_id: RoomId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Whether a room has at least one peer.
    IsRoomActive {
        room_id: RoomId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Look up one registered peer.
    GetPeer {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Option<Peer>>,
    },

    /// Statistics for one room.
    RoomStats {
        room_id: RoomId,
        respond_to: oneshot::Sender<Option<RoomStats>>,
    },

    /// Evict stale peers and remove inactive rooms.
    SweepInactive {
        threshold: Duration,
        respond_to: oneshot::Sender<SweepReport>,
    },

    /// Current hub status.
    GetStatus {
        respond_to: oneshot::Sender<HubStatus>,
    },

    /// Stop accepting registrations and unregister every peer.
    Shutdown {
        /// Returns the number of peers unregistered.
        respond_to: oneshot::Sender<usize>,
    },
}
