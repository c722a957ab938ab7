//! Peer/room data model.
//!
//! Pure value types. No I/O and no locking: the hub actor is the only owner
//! of live instances. Lookups and removals of unknown IDs return explicit
//! not-found results.

mod peer;
mod room;

pub use peer::{is_placeholder_name, resolve_display_name, Peer, PeerState};
pub use room::{Room, RoomStats, StateChange};
