//! Observability for the signaling hub.
//!
//! # Privacy by Default
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit fields. Peer
//! and room IDs appear in logs but never as metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `hub_peers_active` | Gauge | none | Registered peers |
//! | `hub_rooms_active` | Gauge | none | Non-empty rooms |
//! | `hub_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `hub_messages_dispatched_total` | Counter | `message_type` | Dispatched messages |
//! | `hub_dispatch_latency_seconds` | Histogram | `message_type` | Fan-out latency |
//! | `hub_peers_removed_total` | Counter | `reason` | Unregistrations and evictions |
//! | `hub_storage_errors_total` | Counter | `operation` | Failed mirror updates |
//! | `hub_reaper_sweep_duration_seconds` | Histogram | none | Reaper cycle time |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState, StorageMode};
pub use metrics::init_metrics_recorder;
