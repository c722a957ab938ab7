//! Actor model for the signaling hub.
//!
//! ```text
//! SignalingHub (singleton)
//! ├── owns the peer registry and every Room
//! ├── feeds the StorageMirror (fire-and-forget)
//! └── one outbound queue per ConnectionActor
//!     └── ConnectionActor (one per WebSocket connection)
//!         ├── read loop  -> hub commands
//!         └── write loop <- outbound queue, keepalive pings
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: only the hub task touches the registry; every other
//!   component holds a [`SignalingHubHandle`]
//! - **Bounded everything**: the hub mailbox and each outbound queue are
//!   bounded; an overflowing peer is evicted rather than buffered
//! - **Connection generations**: unregistration carries the
//!   [`ConnectionId`] assigned at registration
//! - **CancellationToken propagation**: connection write loops use child
//!   tokens of the hub's token
//!
//! # Modules
//!
//! - [`hub`] - `SignalingHub` singleton owning rooms and peers
//! - [`connection`] - `ConnectionActor` per duplex connection
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod hub;
pub mod messages;
pub mod metrics;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionSettings};
pub use hub::{SignalingHub, SignalingHubHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
