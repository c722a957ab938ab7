//! GoMeet Signaling Hub Library
//!
//! WebSocket signaling server for GoMeet video meetings. The hub relays
//! WebRTC negotiation (offer, answer, ICE candidates), presence and chat
//! events between the participants of a meeting.
//!
//! # Architecture
//!
//! ```text
//! SignalingHub (singleton actor)
//! ├── owns every Room and the peer registry
//! ├── StorageMirror (ordered writer into RoomStorage, fire-and-forget)
//! └── N ConnectionActors (one per WebSocket connection)
//! InactivityReaper (periodic sweep of storage and the hub)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Memory is authoritative**: the hub's registry is the source of truth;
//!   the key-value mirror is advisory and its failures never fail the hub
//! - **Single owner**: all registry mutations are serialized through the
//!   hub's mailbox
//! - **Bounded queues**: a peer that cannot keep up is evicted, never buffered
//!   without limit
//! - **Connection generations**: a replaced connection cannot unregister its
//!   successor
//!
//! # Modules
//!
//! - [`actors`] - Hub and connection actors
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP mappings
//! - [`handlers`] / [`routes`] - HTTP surface (WebSocket upgrade, room queries)
//! - [`identity`] - Peer identity from the auth layer or connect parameters
//! - [`model`] - Peer and Room value types
//! - [`observability`] - Metrics and health endpoints
//! - [`signaling`] - Wire envelope and payloads
//! - [`storage`] - Key-value mirror
//! - [`tasks`] - Background tasks
//! - [`transport`] - Framed duplex transport abstraction

pub mod actors;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod model;
pub mod observability;
pub mod routes;
pub mod signaling;
pub mod storage;
pub mod tasks;
pub mod transport;
