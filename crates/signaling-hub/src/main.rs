//! GoMeet Signaling Hub
//!
//! WebSocket signaling server for meeting participants.
//!
//! # Servers
//!
//! - HTTP server for WebSocket signaling and room queries (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Connect to Redis if configured (degraded, in-memory only, when unreachable)
//! 5. Spawn the storage mirror and the `SignalingHub`
//! 6. Start health HTTP server (liveness, readiness, status, metrics)
//! 7. Start the inactivity reaper
//! 8. Start the signaling HTTP server
//! 9. Wait for shutdown signal
//!
//! # Shutdown Flow
//!
//! 1. Mark not ready
//! 2. Cancel the reaper and servers
//! 3. Hub `Shutdown` (unregisters every peer, closing their queues)
//! 4. Release the hub so the mirror drains and exits
//! 5. Drop the storage client

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::secret::{redact_url_credentials, ExposeSecret};
use signaling_hub::actors::{ActorMetrics, SignalingHubHandle};
use signaling_hub::config::{Config, LogFormat};
use signaling_hub::observability::{health_router, init_metrics_recorder, HealthState};
use signaling_hub::routes::{build_routes, AppState};
use signaling_hub::storage::{RedisKeyValueStore, RoomStorage, StorageMirror};
use signaling_hub::tasks::start_inactivity_reaper;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for servers and connections to finish after shutdown begins.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing. The format is read ahead of the rest of the
    // configuration so configuration errors are logged in it.
    let log_format = std::env::var("HUB_LOG_FORMAT")
        .ok()
        .and_then(|raw| raw.parse::<LogFormat>().ok())
        .unwrap_or_default();
    let (text_layer, json_layer) = match log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signaling_hub=debug,tower_http=debug".into()),
        )
        .with(text_layer)
        .with(json_layer)
        .init();

    info!("Starting Signaling Hub");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        hub_id = %config.hub_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        storage_configured = config.redis_url.is_some(),
        outbound_queue_capacity = config.outbound_queue_capacity,
        ping_interval_seconds = config.ping_interval_seconds,
        idle_timeout_seconds = config.idle_timeout_seconds,
        reaper_interval_seconds = config.reaper_interval_seconds,
        inactivity_threshold_seconds = config.inactivity_threshold_seconds,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Connect to Redis (optional). Storage is advisory: an unreachable store
    // leaves the hub running in-memory only.
    let storage = match &config.redis_url {
        None => {
            info!("No Redis configured, running in-memory only");
            None
        }
        Some(redis_url) => {
            let endpoint = redact_url_credentials(redis_url.expose_secret());
            info!(endpoint = %endpoint, "Connecting to Redis...");
            match RedisKeyValueStore::connect(redis_url.expose_secret()).await {
                Ok(store) => {
                    let storage = RoomStorage::new(Arc::new(store), config.room_ttl());
                    match storage.ping().await {
                        Ok(()) => {
                            health_state.set_storage_connected(true);
                            info!(endpoint = %endpoint, "Redis connection established");
                            Some(storage)
                        }
                        Err(e) => {
                            health_state.set_storage_connected(false);
                            warn!(
                                endpoint = %endpoint,
                                error = %e,
                                "Redis ping failed, continuing in-memory only"
                            );
                            None
                        }
                    }
                }
                Err(e) => {
                    health_state.set_storage_connected(false);
                    warn!(
                        endpoint = %endpoint,
                        error = %e,
                        "Failed to connect to Redis, continuing in-memory only"
                    );
                    None
                }
            }
        }
    };

    // Rooms left by a previous run are not restored: their connections are
    // gone. They expire by TTL or are removed by the reaper.
    if let Some(storage) = &storage {
        match storage.list_active_rooms().await {
            Ok(rooms) if !rooms.is_empty() => {
                info!(
                    rooms = rooms.len(),
                    "Found rooms from a previous run, leaving them to the reaper"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to list rooms from a previous run"),
        }
    }

    // Spawn the storage mirror (only when storage is available)
    let (mirror_handle, mirror_task) = match &storage {
        Some(storage) => {
            let (handle, task) = StorageMirror::spawn(storage.clone());
            (Some(handle), Some(task))
        }
        None => (None, None),
    };

    // Initialize actor system
    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let (hub, hub_task) = SignalingHubHandle::spawn(
        config.hub_id.clone(),
        Arc::clone(&actor_metrics),
        mirror_handle,
    );
    info!("Actor system initialized");

    // Servers and background tasks stop before the hub does
    let shutdown_token = hub.child_token();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    // Add /metrics endpoint served by Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let health_app = health_router(Arc::clone(&health_state), hub.clone()).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    let health_server = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start the inactivity reaper
    let reaper_task = tokio::spawn(start_inactivity_reaper(
        hub.clone(),
        storage.clone(),
        config.reaper_config(),
        shutdown_token.child_token(),
    ));
    info!("Inactivity reaper started");

    // Start signaling HTTP server
    let signaling_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let app = build_routes(Arc::new(AppState {
        hub: hub.clone(),
        metrics: Arc::clone(&actor_metrics),
        settings: config.connection_settings(),
    }));

    let signaling_listener = tokio::net::TcpListener::bind(signaling_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %signaling_addr, "Failed to bind signaling server");
            format!("Failed to bind signaling server to {signaling_addr}: {e}")
        })?;
    info!(addr = %signaling_addr, "Signaling server bound successfully");

    let signaling_shutdown_token = shutdown_token.child_token();
    let signaling_server = tokio::spawn(async move {
        info!(addr = %signaling_addr, "Signaling server starting");
        let server = axum::serve(signaling_listener, app).with_graceful_shutdown(async move {
            signaling_shutdown_token.cancelled().await;
            info!("Signaling server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Signaling Hub running - press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    // Stop accepting connections and stop the reaper
    shutdown_token.cancel();
    if let Err(e) = reaper_task.await {
        warn!(error = %e, "Reaper task failed");
    }

    // Unregister every peer; closing their queues ends their connections
    match hub.shutdown().await {
        Ok(peers) => info!(peers, "Hub unregistered all peers"),
        Err(e) => warn!(error = %e, "Hub shutdown error"),
    }

    for (name, task) in [("signaling", signaling_server), ("health", health_server)] {
        if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, task).await.is_err() {
            warn!(server = name, "Server did not stop within grace period");
        }
    }

    // Release the hub. Cancelling stops it even if a straggling connection
    // still holds a handle; its mirror handle is dropped with it.
    hub.cancel();
    drop(hub);
    if let Err(e) = hub_task.await {
        warn!(error = %e, "Hub task failed");
    }

    if let Some(task) = mirror_task {
        match tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, task).await {
            Ok(Ok(())) => info!("Storage mirror drained"),
            Ok(Err(e)) => warn!(error = %e, "Storage mirror task failed"),
            Err(_) => warn!("Storage mirror did not drain within grace period"),
        }
    }

    drop(storage);

    info!(
        evictions = actor_metrics.eviction_count(),
        "Signaling Hub shutdown complete"
    );
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
