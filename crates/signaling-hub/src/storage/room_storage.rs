//! Durable mirror of rooms and peers.
//!
//! # Key Patterns
//!
//! - `webrtc:room:{id}:metadata` - Room metadata (JSON, no peers)
//! - `webrtc:room:{id}:peers` - Peers of a room (HASH peer id -> peer JSON)
//! - `webrtc:peer:{id}:room` - Reverse pointer from peer to room
//!
//! Every key carries a TTL that is refreshed on write. Storage is advisory:
//! the hub's in-memory registry is authoritative and storage failures are
//! returned as `HubError::StorageUnavailable` for callers to log and absorb.

use super::kv::KeyValueStore;
use crate::config::DEFAULT_ROOM_TTL_SECONDS;
use crate::errors::{HubError, StorageError};
use crate::model::{Peer, Room};
use chrono::{DateTime, Utc};
use common::types::{PeerId, RoomId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default TTL for room and peer keys (24 hours).
pub const DEFAULT_ROOM_TTL: Duration = Duration::from_secs(DEFAULT_ROOM_TTL_SECONDS);

const ROOM_KEY_PREFIX: &str = "webrtc:room:";
const METADATA_SUFFIX: &str = ":metadata";

fn room_metadata_key(room_id: &RoomId) -> String {
    format!("{ROOM_KEY_PREFIX}{room_id}{METADATA_SUFFIX}")
}

fn room_peers_key(room_id: &RoomId) -> String {
    format!("{ROOM_KEY_PREFIX}{room_id}:peers")
}

fn peer_room_key(peer_id: &PeerId) -> String {
    format!("webrtc:peer:{peer_id}:room")
}

/// Outcome of one storage cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub rooms_removed: usize,
    pub peers_removed: usize,
    /// Rooms left in place because a delete failed. Retried next pass.
    pub rooms_failed: usize,
}

/// Room loaded from storage plus whether its peer hash could be read.
struct LoadedRoom {
    room: Room,
    peers_loaded: bool,
}

/// Room/peer persistence over a [`KeyValueStore`].
///
/// Cheap to clone; clones share the underlying store.
#[derive(Clone)]
pub struct RoomStorage {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl RoomStorage {
    /// Create room storage with the given key TTL.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Key TTL applied on every write.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Connectivity check used by readiness.
    pub async fn ping(&self) -> Result<(), HubError> {
        self.store.ping().await.map_err(HubError::from)
    }

    /// Upsert room metadata.
    #[instrument(skip_all, fields(room_id = %room.id))]
    pub async fn save_room(&self, room: &Room) -> Result<(), HubError> {
        let json = serde_json::to_string(room)
            .map_err(|e| HubError::Internal(format!("room encode failed: {e}")))?;
        self.store
            .set_with_ttl(&room_metadata_key(&room.id), &json, self.ttl)
            .await?;
        Ok(())
    }

    /// Load a room with its peers.
    ///
    /// A peer hash that cannot be read yields the room with no peers.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn get_room(&self, room_id: &RoomId) -> Result<Room, HubError> {
        self.load_room(room_id).await.map(|loaded| loaded.room)
    }

    async fn load_room(&self, room_id: &RoomId) -> Result<LoadedRoom, HubError> {
        let key = room_metadata_key(room_id);
        let Some(json) = self.store.get(&key).await? else {
            return Err(HubError::RoomNotFound(room_id.to_string()));
        };

        let mut room: Room = serde_json::from_str(&json).map_err(|e| StorageError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;

        let peers_loaded = match self.store.hash_get_all(&room_peers_key(room_id)).await {
            Ok(fields) => {
                for (peer_id, peer_json) in fields {
                    match serde_json::from_str::<Peer>(&peer_json) {
                        Ok(peer) => room.restore_peer(peer),
                        Err(e) => warn!(
                            target: "hub.storage.room",
                            room_id = %room_id,
                            peer_id = %peer_id,
                            error = %e,
                            "Skipping corrupt peer record"
                        ),
                    }
                }
                true
            }
            Err(e) => {
                warn!(
                    target: "hub.storage.room",
                    room_id = %room_id,
                    error = %e,
                    "Failed to load room peers, returning room without peers"
                );
                false
            }
        };

        Ok(LoadedRoom { room, peers_loaded })
    }

    /// Store a peer, its reverse pointer, and refresh room activity.
    #[instrument(skip_all, fields(room_id = %room_id, peer_id = %peer.id))]
    pub async fn save_peer(&self, room_id: &RoomId, peer: &Peer) -> Result<(), HubError> {
        let json = serde_json::to_string(peer)
            .map_err(|e| HubError::Internal(format!("peer encode failed: {e}")))?;
        let peers_key = room_peers_key(room_id);

        self.store.hash_set(&peers_key, peer.id.as_str(), &json).await?;
        self.store.expire(&peers_key, self.ttl).await?;
        self.store
            .set_with_ttl(&peer_room_key(&peer.id), room_id.as_str(), self.ttl)
            .await?;

        self.touch_room(room_id).await
    }

    /// Load one peer of a room.
    pub async fn get_peer(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<Peer, HubError> {
        let key = room_peers_key(room_id);
        let Some(json) = self.store.hash_get(&key, peer_id.as_str()).await? else {
            return Err(HubError::PeerNotFound(peer_id.to_string()));
        };

        serde_json::from_str(&json).map_err(|e| {
            HubError::from(StorageError::Corrupt {
                key,
                reason: e.to_string(),
            })
        })
    }

    /// Remove a peer and its reverse pointer, then refresh room activity.
    ///
    /// A failed pointer delete is logged and otherwise ignored; the pointer
    /// expires with its TTL.
    #[instrument(skip_all, fields(room_id = %room_id, peer_id = %peer_id))]
    pub async fn remove_peer(&self, room_id: &RoomId, peer_id: &PeerId) -> Result<(), HubError> {
        self.store
            .hash_delete(&room_peers_key(room_id), peer_id.as_str())
            .await?;

        if let Err(e) = self.store.delete(&[peer_room_key(peer_id)]).await {
            warn!(
                target: "hub.storage.room",
                room_id = %room_id,
                peer_id = %peer_id,
                error = %e,
                "Failed to delete peer room pointer"
            );
        }

        self.touch_room(room_id).await
    }

    /// Delete a room, its peer hash, and the reverse pointers of its peers.
    ///
    /// Missing pieces are not an error.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn delete_room(&self, room_id: &RoomId) -> Result<(), HubError> {
        let peers_key = room_peers_key(room_id);

        let peer_ids = match self.store.hash_get_all(&peers_key).await {
            Ok(fields) => fields.into_keys().collect::<Vec<_>>(),
            Err(e) => {
                warn!(
                    target: "hub.storage.room",
                    room_id = %room_id,
                    error = %e,
                    "Failed to list peers of deleted room, pointers left to expire"
                );
                Vec::new()
            }
        };

        let mut keys = vec![room_metadata_key(room_id), peers_key];
        keys.extend(peer_ids.iter().map(|id| peer_room_key(&PeerId::from(id.as_str()))));
        self.store.delete(&keys).await?;

        debug!(
            target: "hub.storage.room",
            room_id = %room_id,
            pointers = peer_ids.len(),
            "Room deleted from storage"
        );
        Ok(())
    }

    /// IDs of all rooms with stored metadata.
    pub async fn list_active_rooms(&self) -> Result<Vec<RoomId>, HubError> {
        let keys = self.store.scan_prefix(ROOM_KEY_PREFIX).await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                key.strip_prefix(ROOM_KEY_PREFIX)?
                    .strip_suffix(METADATA_SUFFIX)
                    .map(RoomId::from)
            })
            .collect())
    }

    /// Room a peer was last stored in.
    pub async fn get_peer_room(&self, peer_id: &PeerId) -> Result<Option<RoomId>, HubError> {
        let room = self.store.get(&peer_room_key(peer_id)).await?;
        Ok(room.map(RoomId::from))
    }

    /// Refresh room activity, creating metadata when missing.
    pub async fn touch_room(&self, room_id: &RoomId) -> Result<(), HubError> {
        let key = room_metadata_key(room_id);
        let mut room = match self.store.get(&key).await? {
            Some(json) => serde_json::from_str::<Room>(&json).unwrap_or_else(|e| {
                warn!(
                    target: "hub.storage.room",
                    room_id = %room_id,
                    error = %e,
                    "Replacing corrupt room metadata"
                );
                Room::new(room_id.clone())
            }),
            None => Room::new(room_id.clone()),
        };

        let now = Utc::now();
        if now > room.last_activity {
            room.last_activity = now;
        }
        self.save_room(&room).await
    }

    /// Remove inactive rooms and stale peers.
    ///
    /// A room is deleted when it has no peers or saw no activity for longer
    /// than `threshold`. In the remaining rooms, peers not seen for longer
    /// than `threshold` are removed.
    pub async fn cleanup_inactive(&self, threshold: Duration) -> Result<CleanupReport, HubError> {
        self.cleanup_inactive_at(threshold, Utc::now()).await
    }

    /// [`cleanup_inactive`](Self::cleanup_inactive) evaluated at `now`.
    #[instrument(skip_all)]
    pub async fn cleanup_inactive_at(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, HubError> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| HubError::Config(format!("inactivity threshold out of range: {e}")))?;
        let mut report = CleanupReport::default();

        for room_id in self.list_active_rooms().await? {
            let loaded = match self.load_room(&room_id).await {
                Ok(loaded) => loaded,
                Err(HubError::RoomNotFound(_)) => continue,
                Err(e) => {
                    warn!(
                        target: "hub.storage.room",
                        room_id = %room_id,
                        error = %e,
                        "Skipping room during cleanup"
                    );
                    continue;
                }
            };
            let room = loaded.room;

            let empty = loaded.peers_loaded && room.is_empty();
            if empty || room.is_inactive(threshold, now) {
                if let Err(e) = self.delete_room(&room_id).await {
                    warn!(
                        target: "hub.storage.room",
                        room_id = %room_id,
                        error = %e,
                        "Failed to delete inactive room, retrying next pass"
                    );
                    report.rooms_failed += 1;
                    continue;
                }
                report.rooms_removed += 1;
                report.peers_removed += room.peer_count();
                continue;
            }

            for peer_id in room.stale_peers(threshold, now) {
                if let Err(e) = self
                    .store
                    .hash_delete(&room_peers_key(&room_id), peer_id.as_str())
                    .await
                {
                    warn!(
                        target: "hub.storage.room",
                        room_id = %room_id,
                        peer_id = %peer_id,
                        error = %e,
                        "Failed to delete stale peer, retrying next pass"
                    );
                    report.rooms_failed += 1;
                    break;
                }
                if let Err(e) = self.store.delete(&[peer_room_key(&peer_id)]).await {
                    warn!(
                        target: "hub.storage.room",
                        peer_id = %peer_id,
                        error = %e,
                        "Failed to delete stale peer pointer"
                    );
                }
                report.peers_removed += 1;
            }
        }

        if report.rooms_removed > 0 || report.peers_removed > 0 || report.rooms_failed > 0 {
            info!(
                target: "hub.storage.room",
                rooms_removed = report.rooms_removed,
                peers_removed = report.peers_removed,
                rooms_failed = report.rooms_failed,
                "Storage cleanup removed inactive state"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identity::PeerIdentity;
    use crate::storage::kv::mock::MockKeyValueStore;

    fn storage() -> (MockKeyValueStore, RoomStorage) {
        let store = MockKeyValueStore::new();
        let storage = RoomStorage::new(Arc::new(store.clone()), DEFAULT_ROOM_TTL);
        (store, storage)
    }

    fn peer(room: &str, id: &str) -> Peer {
        let identity = PeerIdentity::new(PeerId::from(id), id);
        Peer::new(&identity, RoomId::from(room), id.to_string())
    }

    #[tokio::test]
    async fn test_key_layout() {
        assert_eq!(room_metadata_key(&RoomId::from("m1")), "webrtc:room:m1:metadata");
        assert_eq!(room_peers_key(&RoomId::from("m1")), "webrtc:room:m1:peers");
        assert_eq!(peer_room_key(&PeerId::from("u1")), "webrtc:peer:u1:room");
    }

    #[tokio::test]
    async fn test_save_and_get_room_with_peers() {
        let (store, storage) = storage();
        let room_id = RoomId::from("m1");
        storage.save_room(&Room::new(room_id.clone())).await.unwrap();
        storage.save_peer(&room_id, &peer("m1", "u1")).await.unwrap();
        storage.save_peer(&room_id, &peer("m1", "u2")).await.unwrap();

        let room = storage.get_room(&room_id).await.unwrap();
        assert_eq!(room.peer_count(), 2);
        assert!(store.ttl("webrtc:room:m1:peers").is_some());
        assert!(store.ttl("webrtc:room:m1:metadata").is_some());
        assert_eq!(
            storage.get_peer_room(&PeerId::from("u1")).await.unwrap(),
            Some(room_id)
        );
    }

    #[tokio::test]
    async fn test_missing_room_is_not_found() {
        let (_store, storage) = storage();
        let err = storage.get_room(&RoomId::from("nope")).await.unwrap_err();
        assert!(matches!(err, HubError::RoomNotFound(_)));

        let err = storage
            .get_peer(&RoomId::from("nope"), &PeerId::from("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::PeerNotFound(_)));
    }

    #[tokio::test]
    async fn test_save_peer_creates_missing_metadata() {
        let (_store, storage) = storage();
        let room_id = RoomId::from("m1");
        storage.save_peer(&room_id, &peer("m1", "u1")).await.unwrap();

        let room = storage.get_room(&room_id).await.unwrap();
        assert_eq!(room.peer_count(), 1);
        assert_eq!(
            storage.get_peer(&room_id, &PeerId::from("u1")).await.unwrap().name,
            "u1"
        );
    }

    #[tokio::test]
    async fn test_unreachable_store_is_storage_unavailable() {
        let (store, storage) = storage();
        store.set_unavailable(true);

        let err = storage.save_room(&Room::new(RoomId::from("m1"))).await.unwrap_err();
        assert!(matches!(err, HubError::StorageUnavailable(_)));
        let err = storage.get_room(&RoomId::from("m1")).await.unwrap_err();
        assert!(matches!(err, HubError::StorageUnavailable(_)));
        assert!(storage.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_peer_hash_failure_returns_room_without_peers() {
        let (store, storage) = storage();
        let room_id = RoomId::from("m1");
        storage.save_peer(&room_id, &peer("m1", "u1")).await.unwrap();

        store.set_fail_hash_reads(true);
        let room = storage.get_room(&room_id).await.unwrap();
        assert!(room.is_empty());
    }

    #[tokio::test]
    async fn test_remove_peer_tolerates_pointer_failure() {
        let (store, storage) = storage();
        let room_id = RoomId::from("m1");
        storage.save_peer(&room_id, &peer("m1", "u1")).await.unwrap();

        store.set_fail_deletes(true);
        storage.remove_peer(&room_id, &PeerId::from("u1")).await.unwrap();
        store.set_fail_deletes(false);

        let room = storage.get_room(&room_id).await.unwrap();
        assert!(room.is_empty());
        // Pointer survives until its TTL
        assert!(store.contains_key("webrtc:peer:u1:room"));
    }

    #[tokio::test]
    async fn test_delete_room_removes_everything() {
        let (store, storage) = storage();
        let room_id = RoomId::from("m1");
        storage.save_peer(&room_id, &peer("m1", "u1")).await.unwrap();
        storage.save_peer(&room_id, &peer("m1", "u2")).await.unwrap();

        storage.delete_room(&room_id).await.unwrap();
        assert_eq!(store.key_count(), 0);

        // Deleting again is fine
        storage.delete_room(&room_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_active_rooms_only_metadata_keys() {
        let (_store, storage) = storage();
        storage.save_peer(&RoomId::from("m1"), &peer("m1", "u1")).await.unwrap();
        storage.save_room(&Room::new(RoomId::from("m2"))).await.unwrap();

        let mut rooms = storage.list_active_rooms().await.unwrap();
        rooms.sort();
        assert_eq!(rooms, vec![RoomId::from("m1"), RoomId::from("m2")]);
    }

    #[tokio::test]
    async fn test_cleanup_threshold_boundaries() {
        let (_store, storage) = storage();
        let threshold = Duration::from_secs(600);
        let room_id = RoomId::from("m1");
        storage.save_peer(&room_id, &peer("m1", "u1")).await.unwrap();
        let last_activity = storage.get_room(&room_id).await.unwrap().last_activity;

        // threshold - 1s: kept
        let now = last_activity + chrono::Duration::seconds(599);
        let report = storage.cleanup_inactive_at(threshold, now).await.unwrap();
        assert_eq!(report, CleanupReport::default());
        assert!(storage.get_room(&room_id).await.is_ok());

        // threshold + 1s: removed
        let now = last_activity + chrono::Duration::seconds(601);
        let report = storage.cleanup_inactive_at(threshold, now).await.unwrap();
        assert_eq!(report.rooms_removed, 1);
        assert_eq!(report.peers_removed, 1);
        assert!(matches!(
            storage.get_room(&room_id).await,
            Err(HubError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_removes_empty_rooms() {
        let (_store, storage) = storage();
        storage.save_room(&Room::new(RoomId::from("empty"))).await.unwrap();

        let report = storage.cleanup_inactive(Duration::from_secs(600)).await.unwrap();
        assert_eq!(report.rooms_removed, 1);
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_failed_room() {
        let (store, storage) = storage();
        for id in ["a", "b", "c"] {
            storage.save_room(&Room::new(RoomId::from(id))).await.unwrap();
        }
        store.set_fail_deletes_containing(Some("webrtc:room:b:"));

        let report = storage.cleanup_inactive(Duration::from_secs(600)).await.unwrap();
        assert_eq!(report.rooms_removed, 2);
        assert_eq!(report.rooms_failed, 1);
        assert_eq!(
            storage.list_active_rooms().await.unwrap(),
            vec![RoomId::from("b")]
        );

        // Retried on the next pass once the store recovers
        store.set_fail_deletes_containing(None);
        let report = storage.cleanup_inactive(Duration::from_secs(600)).await.unwrap();
        assert_eq!(report.rooms_removed, 1);
        assert!(storage.list_active_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_rooms_whose_peers_could_not_be_read() {
        let (store, storage) = storage();
        storage.save_peer(&RoomId::from("m1"), &peer("m1", "u1")).await.unwrap();

        store.set_fail_hash_reads(true);
        let report = storage.cleanup_inactive(Duration::from_secs(600)).await.unwrap();
        assert_eq!(report.rooms_removed, 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_stale_peers_from_live_room() {
        let (_store, storage) = storage();
        let room_id = RoomId::from("m1");
        let now = Utc::now();

        let mut stale = peer("m1", "old");
        stale.last_seen = now - chrono::Duration::seconds(900);
        storage.save_peer(&room_id, &stale).await.unwrap();
        storage.save_peer(&room_id, &peer("m1", "fresh")).await.unwrap();

        let report = storage
            .cleanup_inactive_at(Duration::from_secs(600), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.rooms_removed, 0);
        assert_eq!(report.peers_removed, 1);

        let room = storage.get_room(&room_id).await.unwrap();
        assert_eq!(room.peer_ids(), vec![PeerId::from("fresh")]);
        assert_eq!(storage.get_peer_room(&PeerId::from("old")).await.unwrap(), None);
    }
}
