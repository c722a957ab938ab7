//! Inactivity reaper background task.
//!
//! Periodically removes state nobody is using:
//! 1. Cleans inactive rooms and stale peers out of room storage (when configured)
//! 2. Asks the hub to evict stale peers and drop inactive rooms in memory
//!
//! The first sweep runs one full interval after start.
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the token
//! is cancelled, the task completes its current iteration and exits cleanly.

use crate::actors::SignalingHubHandle;
use crate::config::{DEFAULT_INACTIVITY_THRESHOLD_SECONDS, DEFAULT_REAPER_INTERVAL_SECONDS};
use crate::observability::metrics;
use crate::storage::RoomStorage;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Configuration for the inactivity reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Idle time after which a room or peer is removed.
    pub threshold: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECONDS),
            threshold: Duration::from_secs(DEFAULT_INACTIVITY_THRESHOLD_SECONDS),
        }
    }
}

/// Start the inactivity reaper background task.
///
/// # Arguments
///
/// * `hub` - Handle to the registry owner
/// * `storage` - Room storage, `None` when running in-memory only
/// * `config` - Sweep interval and threshold
/// * `cancel_token` - Token for graceful shutdown
///
/// # Returns
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "hub.task.reaper")]
pub async fn start_inactivity_reaper(
    hub: SignalingHubHandle,
    storage: Option<RoomStorage>,
    config: ReaperConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "hub.task.reaper",
        interval_seconds = config.interval.as_secs(),
        threshold_seconds = config.threshold.as_secs(),
        storage_enabled = storage.is_some(),
        "Starting inactivity reaper"
    );

    let mut interval =
        tokio::time::interval_at(tokio::time::Instant::now() + config.interval, config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_sweep(&hub, storage.as_ref(), &config).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "hub.task.reaper",
                    "Inactivity reaper received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "hub.task.reaper", "Inactivity reaper stopped");
}

/// Run a single sweep.
///
/// Separated from the main loop to allow direct testing.
pub(crate) async fn run_sweep(
    hub: &SignalingHubHandle,
    storage: Option<&RoomStorage>,
    config: &ReaperConfig,
) {
    let started = Instant::now();
    let mut rooms_removed = 0;
    let mut peers_removed = 0;

    // Step 1: storage. Advisory, so a failure never skips the in-memory sweep.
    if let Some(storage) = storage {
        match storage.cleanup_inactive(config.threshold).await {
            Ok(report) => {
                if report.rooms_removed > 0 || report.peers_removed > 0 {
                    info!(
                        target: "hub.task.reaper",
                        rooms_removed = report.rooms_removed,
                        peers_removed = report.peers_removed,
                        "Removed inactive state from storage"
                    );
                }
                rooms_removed += report.rooms_removed;
                peers_removed += report.peers_removed;
            }
            Err(e) => {
                warn!(
                    target: "hub.task.reaper",
                    error = %e,
                    "Storage cleanup failed"
                );
            }
        }
    }

    // Step 2: in-memory registry
    match hub.sweep_inactive(config.threshold).await {
        Ok(report) => {
            rooms_removed += report.rooms_removed;
            peers_removed += report.peers_removed;
        }
        Err(e) => {
            error!(
                target: "hub.task.reaper",
                error = %e,
                "Hub sweep failed"
            );
        }
    }

    metrics::record_reaper_sweep(rooms_removed, peers_removed, started.elapsed());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{ActorMetrics, PeerRegistration};
    use crate::identity::PeerIdentity;
    use crate::model::Room;
    use crate::storage::kv::mock::MockKeyValueStore;
    use crate::storage::DEFAULT_ROOM_TTL;
    use common::types::{PeerId, RoomId};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn hub() -> SignalingHubHandle {
        SignalingHubHandle::new("hub-test".to_string(), ActorMetrics::new(), None)
    }

    #[test]
    fn test_default_config() {
        let config = ReaperConfig::default();
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.threshold, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_sweep_removes_idle_peers() {
        let hub = hub();
        let (outbound, _rx) = mpsc::channel(8);
        hub.register(PeerRegistration {
            identity: PeerIdentity::new(PeerId::from("u1"), "Alice"),
            room_id: RoomId::from("m1"),
            outbound,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let config = ReaperConfig {
            interval: Duration::from_secs(300),
            threshold: Duration::ZERO,
        };
        run_sweep(&hub, None, &config).await;

        assert!(!hub.is_room_active(RoomId::from("m1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_skip_hub_sweep() {
        let hub = hub();
        let (outbound, _rx) = mpsc::channel(8);
        hub.register(PeerRegistration {
            identity: PeerIdentity::new(PeerId::from("u1"), "Alice"),
            room_id: RoomId::from("m1"),
            outbound,
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let store = MockKeyValueStore::new();
        store.set_unavailable(true);
        let storage = RoomStorage::new(Arc::new(store), DEFAULT_ROOM_TTL);

        let config = ReaperConfig {
            interval: Duration::from_secs(300),
            threshold: Duration::ZERO,
        };
        run_sweep(&hub, Some(&storage), &config).await;

        assert_eq!(hub.peer_count(RoomId::from("m1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_cleans_empty_rooms_from_storage() {
        let hub = hub();
        let store = MockKeyValueStore::new();
        let storage = RoomStorage::new(Arc::new(store.clone()), DEFAULT_ROOM_TTL);
        storage.save_room(&Room::new(RoomId::from("m9"))).await.unwrap();

        run_sweep(&hub, Some(&storage), &ReaperConfig::default()).await;

        assert!(storage.list_active_rooms().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_stops_on_cancellation() {
        let hub = hub();
        let token = CancellationToken::new();
        let task = tokio::spawn(start_inactivity_reaper(
            hub,
            None,
            ReaperConfig::default(),
            token.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(!task.is_finished());

        token.cancel();
        task.await.unwrap();
    }
}
