//! Ordered, non-blocking writer from the hub to room storage.
//!
//! The hub submits [`MirrorOp`]s with `try_send` and never awaits storage
//! I/O. One task applies them in submission order. Failures are logged and
//! dropped. When every [`MirrorHandle`] is gone the task drains the queue and
//! exits.

use super::room_storage::RoomStorage;
use crate::model::{Peer, Room};
use common::types::{PeerId, RoomId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Queue capacity between the hub and the mirror task.
pub const MIRROR_CHANNEL_BUFFER: usize = 4096;

/// One storage update.
#[derive(Debug, Clone)]
pub enum MirrorOp {
    SavePeer { room_id: RoomId, peer: Peer },
    RemovePeer { room_id: RoomId, peer_id: PeerId },
    SaveRoom { room: Room },
    DeleteRoom { room_id: RoomId },
}

impl MirrorOp {
    fn name(&self) -> &'static str {
        match self {
            MirrorOp::SavePeer { .. } => "save_peer",
            MirrorOp::RemovePeer { .. } => "remove_peer",
            MirrorOp::SaveRoom { .. } => "save_room",
            MirrorOp::DeleteRoom { .. } => "delete_room",
        }
    }
}

/// Submission side of the mirror.
#[derive(Debug, Clone)]
pub struct MirrorHandle {
    sender: mpsc::Sender<MirrorOp>,
    dropped: Arc<AtomicU64>,
}

impl MirrorHandle {
    /// Queue an update without waiting. A full or closed queue drops it.
    pub fn submit(&self, op: MirrorOp) {
        if let Err(e) = self.sender.try_send(op) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let (reason, op) = match e {
                mpsc::error::TrySendError::Full(op) => ("full", op),
                mpsc::error::TrySendError::Closed(op) => ("closed", op),
            };
            crate::observability::metrics::record_mirror_drop(reason);
            warn!(
                target: "hub.storage.mirror",
                operation = op.name(),
                reason = reason,
                dropped_total = dropped,
                "Mirror update dropped"
            );
        }
    }

    /// Updates dropped since start.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The mirror task.
pub struct StorageMirror;

impl StorageMirror {
    /// Spawn the mirror task over `storage`.
    #[must_use]
    pub fn spawn(storage: RoomStorage) -> (MirrorHandle, JoinHandle<()>) {
        Self::spawn_with_capacity(storage, MIRROR_CHANNEL_BUFFER)
    }

    /// Spawn with an explicit queue capacity.
    #[must_use]
    pub fn spawn_with_capacity(
        storage: RoomStorage,
        capacity: usize,
    ) -> (MirrorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run(storage, receiver));
        (
            MirrorHandle {
                sender,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            task,
        )
    }
}

async fn run(storage: RoomStorage, mut receiver: mpsc::Receiver<MirrorOp>) {
    debug!(target: "hub.storage.mirror", "Storage mirror started");
    let mut applied: u64 = 0;

    while let Some(op) = receiver.recv().await {
        let name = op.name();
        let result = match op {
            MirrorOp::SavePeer { room_id, peer } => storage.save_peer(&room_id, &peer).await,
            MirrorOp::RemovePeer { room_id, peer_id } => {
                storage.remove_peer(&room_id, &peer_id).await
            }
            MirrorOp::SaveRoom { room } => storage.save_room(&room).await,
            MirrorOp::DeleteRoom { room_id } => storage.delete_room(&room_id).await,
        };

        match result {
            Ok(()) => applied += 1,
            Err(e) => {
                crate::observability::metrics::record_storage_error(name);
                warn!(
                    target: "hub.storage.mirror",
                    operation = name,
                    error = %e,
                    "Mirror update failed"
                );
            }
        }
    }

    info!(
        target: "hub.storage.mirror",
        applied = applied,
        "Storage mirror drained, exiting"
    );
}
