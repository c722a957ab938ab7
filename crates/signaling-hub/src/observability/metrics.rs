//! Metrics definitions for the signaling hub.
//!
//! All metrics follow Prometheus naming conventions:
//! - `hub_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `actor_type`: 3 values (hub, mirror, connection)
//! - `message_type`: bounded by signaling message tags (~16 values)
//! - `reason`: bounded by leave/eviction/drop reasons (< 10 values)
//! - `operation`: bounded by storage operations (4 values)
//!
//! Room and peer IDs are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Dispatch is in-memory fan-out; expect sub-millisecond
        .set_buckets_for_metric(
            Matcher::Prefix("hub_dispatch".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250,
            ],
        )
        .map_err(|e| format!("Failed to set dispatch latency buckets: {e}"))?
        // Reaper sweeps include storage scans
        .set_buckets_for_metric(
            Matcher::Prefix("hub_reaper".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set reaper duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Registry Gauges
// ============================================================================

/// Set the number of registered peers.
///
/// Metric: `hub_peers_active`
pub fn set_peers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_peers_active").set(count as f64);
}

/// Set the number of non-empty rooms.
///
/// Metric: `hub_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_rooms_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `hub_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("hub_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Signaling Metrics
// ============================================================================

/// Record one dispatched message and its fan-out.
///
/// Metrics: `hub_messages_dispatched_total`, `hub_dispatch_latency_seconds`
/// Labels: `message_type`
pub fn record_dispatch(message_type: &str, delivered: usize, duration: Duration) {
    counter!("hub_messages_dispatched_total", "message_type" => message_type.to_string())
        .increment(1);
    counter!("hub_message_deliveries_total", "message_type" => message_type.to_string())
        .increment(delivered as u64);
    histogram!("hub_dispatch_latency_seconds", "message_type" => message_type.to_string())
        .record(duration.as_secs_f64());
}

/// Record an inbound frame that was not dispatched.
///
/// Metric: `hub_inbound_rejected_total`
/// Labels: `reason` (malformed, unknown_type, server_only, invalid_payload)
pub fn record_inbound_rejected(reason: &str) {
    counter!("hub_inbound_rejected_total", "reason" => reason.to_string()).increment(1);
}

/// Record a registration.
///
/// Metric: `hub_registrations_total`
/// Labels: `outcome` (new, replaced, refused)
pub fn record_registration(outcome: &str) {
    counter!("hub_registrations_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a peer leaving the registry.
///
/// Metric: `hub_peers_removed_total`
/// Labels: `reason` (see `LeaveReason`)
pub fn record_peer_removed(reason: &str) {
    counter!("hub_peers_removed_total", "reason" => reason.to_string()).increment(1);
}

/// Record a rejected peer state transition.
///
/// Metric: `hub_state_transitions_rejected_total`
pub fn record_state_transition_rejected() {
    counter!("hub_state_transitions_rejected_total").increment(1);
}

// ============================================================================
// Storage Metrics
// ============================================================================

/// Record a failed storage mirror update.
///
/// Metric: `hub_storage_errors_total`
/// Labels: `operation` (save_peer, remove_peer, save_room, delete_room)
pub fn record_storage_error(operation: &str) {
    counter!("hub_storage_errors_total", "operation" => operation.to_string()).increment(1);
}

/// Record a mirror update dropped before reaching storage.
///
/// Metric: `hub_mirror_dropped_total`
/// Labels: `reason` (full, closed)
pub fn record_mirror_drop(reason: &str) {
    counter!("hub_mirror_dropped_total", "reason" => reason.to_string()).increment(1);
}

// ============================================================================
// Reaper Metrics
// ============================================================================

/// Record one reaper cycle.
///
/// Metrics: `hub_reaper_sweeps_total`, `hub_reaper_rooms_removed_total`,
/// `hub_reaper_peers_removed_total`, `hub_reaper_sweep_duration_seconds`
pub fn record_reaper_sweep(rooms_removed: usize, peers_removed: usize, duration: Duration) {
    counter!("hub_reaper_sweeps_total").increment(1);
    counter!("hub_reaper_rooms_removed_total").increment(rooms_removed as u64);
    counter!("hub_reaper_peers_removed_total").increment(peers_removed as u64);
    histogram!("hub_reaper_sweep_duration_seconds").record(duration.as_secs_f64());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // These execute against the global no-op recorder when none is installed.

    #[test]
    fn test_gauges() {
        set_peers_active(3);
        set_rooms_active(1);
        set_actor_mailbox_depth("hub", 0);
    }

    #[test]
    fn test_counters_and_histograms() {
        record_dispatch("offer", 1, Duration::from_micros(50));
        record_inbound_rejected("malformed");
        record_registration("new");
        record_peer_removed("left");
        record_state_transition_rejected();
        record_storage_error("save_peer");
        record_mirror_drop("full");
        record_reaper_sweep(1, 2, Duration::from_millis(5));
    }

    #[test]
    fn test_metrics_are_recorded() {
        use metrics_util::debugging::DebuggingRecorder;

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_peers_active(2);
            set_rooms_active(1);
            record_dispatch("chat-message", 4, Duration::from_micros(10));
            record_peer_removed("slow_consumer");
            record_reaper_sweep(0, 0, Duration::from_millis(1));
        });

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "hub_peers_active",
            "hub_rooms_active",
            "hub_messages_dispatched_total",
            "hub_message_deliveries_total",
            "hub_dispatch_latency_seconds",
            "hub_peers_removed_total",
            "hub_reaper_sweeps_total",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
        assert!(names.iter().all(|n| n.starts_with("hub_")));
    }
}
