//! Room value type: the peers of one meeting's signaling session.

use super::peer::{Peer, PeerState};
use chrono::{DateTime, Utc};
use common::types::{PeerId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Result of a peer state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// The transition was applied.
    Applied { from: PeerState, to: PeerState },
    /// The peer was already in the requested state; activity was refreshed.
    Unchanged(PeerState),
    /// The transition is not allowed; nothing changed.
    Rejected { from: PeerState, to: PeerState },
    /// No peer with that ID is in the room.
    NotFound,
}

/// Point-in-time statistics for one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    #[serde(rename = "meetingId")]
    pub room_id: RoomId,
    pub peer_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub state_count: BTreeMap<PeerState, usize>,
}

/// A conferencing room.
///
/// Invariant: `last_activity` is never older than the `last_seen` of any peer
/// in the room. Every mutation refreshes it.
///
/// The peer map is not part of the serialized form; the storage layer keeps
/// peers in a separate hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(rename = "meetingId")]
    pub id: RoomId,
    #[serde(skip)]
    peers: HashMap<PeerId, Peer>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        let now = Utc::now();
        Self {
            id,
            peers: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Insert a peer, replacing any peer with the same ID. Returns the replaced peer.
    pub fn add_peer(&mut self, peer: Peer) -> Option<Peer> {
        let seen = peer.last_seen;
        let replaced = self.peers.insert(peer.id.clone(), peer);
        self.refresh(Utc::now().max(seen));
        replaced
    }

    /// Insert a peer loaded from storage without touching activity timestamps.
    pub(crate) fn restore_peer(&mut self, peer: Peer) {
        self.peers.insert(peer.id.clone(), peer);
    }

    /// Remove a peer by ID. Returns `None` if it was not in the room.
    pub fn remove_peer(&mut self, peer_id: &PeerId) -> Option<Peer> {
        let removed = self.peers.remove(peer_id);
        if removed.is_some() {
            self.refresh(Utc::now());
        }
        removed
    }

    /// Look up a peer by ID.
    #[must_use]
    pub fn peer(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    /// Iterate over all peers (unordered).
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// IDs of all peers (unordered).
    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Update a peer's connection state.
    ///
    /// Applied and same-state updates refresh the peer and room activity.
    /// Rejected updates change nothing.
    pub fn update_peer_state(&mut self, peer_id: &PeerId, state: PeerState) -> StateChange {
        let now = Utc::now();
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return StateChange::NotFound;
        };

        let from = peer.state;
        if !from.can_transition_to(state) {
            return StateChange::Rejected { from, to: state };
        }

        peer.state = state;
        peer.touch(now);
        self.refresh(now);

        if from == state {
            StateChange::Unchanged(state)
        } else {
            StateChange::Applied { from, to: state }
        }
    }

    /// Refresh a peer's activity. Returns false if the peer is not in the room.
    pub fn touch_peer(&mut self, peer_id: &PeerId) -> bool {
        let now = Utc::now();
        match self.peers.get_mut(peer_id) {
            Some(peer) => {
                peer.touch(now);
                self.refresh(now);
                true
            }
            None => false,
        }
    }

    /// True when the room saw no activity for longer than `threshold`.
    #[must_use]
    pub fn is_inactive(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_activity) > threshold
    }

    /// IDs of peers not seen for longer than `threshold`.
    #[must_use]
    pub fn stale_peers(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|peer| peer.is_stale(threshold, now))
            .map(|peer| peer.id.clone())
            .collect()
    }

    /// Snapshot statistics for the status surface.
    #[must_use]
    pub fn stats(&self) -> RoomStats {
        let mut state_count = BTreeMap::new();
        for peer in self.peers.values() {
            *state_count.entry(peer.state).or_insert(0) += 1;
        }

        RoomStats {
            room_id: self.id.clone(),
            peer_count: self.peers.len(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            state_count,
        }
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identity::PeerIdentity;

    fn peer(id: &str) -> Peer {
        let identity = PeerIdentity::new(PeerId::from(id), id);
        Peer::new(&identity, RoomId::from("m1"), id.to_string())
    }

    #[test]
    fn test_add_and_lookup() {
        let mut room = Room::new(RoomId::from("m1"));
        assert!(room.add_peer(peer("a")).is_none());
        assert!(room.add_peer(peer("b")).is_none());

        assert_eq!(room.peer_count(), 2);
        assert_eq!(room.peers().count(), room.peer_count());
        assert_eq!(room.peer(&PeerId::from("a")).map(|p| p.name.as_str()), Some("a"));
        assert!(room.peer(&PeerId::from("zzz")).is_none());
    }

    #[test]
    fn test_add_same_id_replaces() {
        let mut room = Room::new(RoomId::from("m1"));
        room.add_peer(peer("a"));
        let replaced = room.add_peer(peer("a"));
        assert!(replaced.is_some());
        assert_eq!(room.peer_count(), 1);
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut room = Room::new(RoomId::from("m1"));
        assert!(room.remove_peer(&PeerId::from("ghost")).is_none());
        room.add_peer(peer("a"));
        assert!(room.remove_peer(&PeerId::from("a")).is_some());
        assert!(room.is_empty());
        assert_eq!(room.peer_ids().len(), 0);
    }

    #[test]
    fn test_update_state_applied_and_rejected() {
        let mut room = Room::new(RoomId::from("m1"));
        room.add_peer(peer("a"));
        let id = PeerId::from("a");

        assert_eq!(
            room.update_peer_state(&id, PeerState::Connected),
            StateChange::Rejected {
                from: PeerState::New,
                to: PeerState::Connected
            }
        );
        assert_eq!(room.peer(&id).map(|p| p.state), Some(PeerState::New));

        assert_eq!(
            room.update_peer_state(&id, PeerState::Connecting),
            StateChange::Applied {
                from: PeerState::New,
                to: PeerState::Connecting
            }
        );
        assert_eq!(
            room.update_peer_state(&id, PeerState::Connecting),
            StateChange::Unchanged(PeerState::Connecting)
        );
        assert_eq!(
            room.update_peer_state(&PeerId::from("ghost"), PeerState::Connecting),
            StateChange::NotFound
        );
    }

    #[test]
    fn test_room_activity_covers_peer_activity() {
        let mut room = Room::new(RoomId::from("m1"));
        room.add_peer(peer("a"));
        room.add_peer(peer("b"));
        room.touch_peer(&PeerId::from("b"));
        room.update_peer_state(&PeerId::from("a"), PeerState::Connecting);

        let newest_peer = room.peers().map(|p| p.last_seen).max().unwrap();
        assert!(room.last_activity >= newest_peer);
    }

    #[test]
    fn test_add_peer_with_future_last_seen_lifts_room_activity() {
        let mut room = Room::new(RoomId::from("m1"));
        let mut p = peer("a");
        p.last_seen = Utc::now() + chrono::Duration::seconds(5);
        let seen = p.last_seen;
        room.add_peer(p);
        assert!(room.last_activity >= seen);
    }

    #[test]
    fn test_inactivity_threshold_is_strict() {
        let mut room = Room::new(RoomId::from("m1"));
        let threshold = chrono::Duration::seconds(600);
        let now = Utc::now();

        room.last_activity = now - chrono::Duration::seconds(601);
        assert!(room.is_inactive(threshold, now));

        room.last_activity = now - chrono::Duration::seconds(599);
        assert!(!room.is_inactive(threshold, now));
    }

    #[test]
    fn test_stale_peers() {
        let mut room = Room::new(RoomId::from("m1"));
        let now = Utc::now();
        let mut old = peer("old");
        old.last_seen = now - chrono::Duration::seconds(700);
        room.restore_peer(old);
        room.restore_peer(peer("fresh"));

        let stale = room.stale_peers(chrono::Duration::seconds(600), now);
        assert_eq!(stale, vec![PeerId::from("old")]);
    }

    #[test]
    fn test_stats_count_states() {
        let mut room = Room::new(RoomId::from("m1"));
        room.add_peer(peer("a"));
        room.add_peer(peer("b"));
        room.update_peer_state(&PeerId::from("a"), PeerState::Connecting);

        let stats = room.stats();
        assert_eq!(stats.peer_count, 2);
        assert_eq!(stats.state_count.get(&PeerState::New), Some(&1));
        assert_eq!(stats.state_count.get(&PeerState::Connecting), Some(&1));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["stateCount"]["new"], 1);
        assert_eq!(json["meetingId"], "m1");
    }

    #[test]
    fn test_serialized_room_has_no_peers() {
        let mut room = Room::new(RoomId::from("m1"));
        room.add_peer(peer("a"));
        let json = serde_json::to_value(&room).unwrap();
        assert!(json.get("peers").is_none());

        let restored: Room = serde_json::from_value(json).unwrap();
        assert!(restored.is_empty());
        assert_eq!(restored.last_activity, room.last_activity);
    }
}
