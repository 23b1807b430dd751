//! Leave-Vote Room Service
//!
//! # Servers
//!
//! - WebSocket/HTTP server for participants (default: 0.0.0.0:8080)
//! - HTTP server for health and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Select backends (bounded Redis check, local-only fallback)
//! 5. Spawn the fanout listener
//! 6. Start health server
//! 7. Bind the client listener, mark ready
//! 8. Wait for shutdown signal
//!
//! # Shutdown
//!
//! Not-ready, stop accepting, let open connections finish for the grace
//! period, then close the rest (each runs its leave path), then stop the
//! fanout listener and health server.

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use room_service::backend::select_backends;
use room_service::config::Config;
use room_service::credential::{CredentialDecoder, CredentialResolver};
use room_service::observability::{health_router, init_metrics_recorder, HealthState};
use room_service::registry::ConnectionRegistry;
use room_service::render::GaugeRenderer;
use room_service::room::RoomService;
use room_service::transport::{build_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Extra time for cancelled connections to run their leave path.
const FORCED_CLOSE_DRAIN: Duration = Duration::from_secs(2);

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "room_service=debug,tower_http=debug".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Log format comes from config, so load it before the subscriber exists
    let loaded = Config::from_env();
    init_tracing(loaded.as_ref().is_ok_and(|c| c.log_json));

    info!("Starting room service");

    let config = loaded.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        room_ttl_seconds = config.room_ttl_seconds,
        backend_timeout_ms = config.backend_timeout_ms,
        dev_bypass = config.dev_bypass,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let resolver = if config.dev_bypass {
        CredentialResolver::dev_bypass()
    } else {
        let secret = config.client_secret.as_ref().ok_or_else(|| {
            error!("ROOM_CLIENT_SECRET is required unless ROOM_DEV_BYPASS is enabled");
            "ROOM_CLIENT_SECRET is required"
        })?;
        CredentialResolver::new(CredentialDecoder::new(secret)?)
    };

    let backends = select_backends(
        config.redis_url.as_ref(),
        config.room_ttl(),
        config.redis_connect_timeout(),
    )
    .await;
    info!(backend = backends.kind().as_str(), "Room backend selected");

    let shutdown_token = CancellationToken::new();
    let registry = Arc::new(ConnectionRegistry::new());

    // One fanout listener per process
    let listener_token = shutdown_token.child_token();
    let fanout_task = tokio::spawn(room_service::fanout::run_fanout_listener(
        Arc::clone(&backends.bus),
        Arc::clone(&registry),
        listener_token,
    ));

    let rooms = RoomService::new(
        backends.store,
        backends.bus,
        Arc::new(GaugeRenderer),
        config.backend_timeout(),
    );
    let state = AppState::new(rooms, Arc::clone(&registry), Arc::new(resolver));
    let connections_cancel = state.connections_cancel.clone();
    let connections = state.connections.clone();

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));
    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let bind_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let listener = tokio::net::TcpListener::bind(bind_addr).await.map_err(|e| {
        error!(error = %e, addr = %bind_addr, "Failed to bind client listener");
        format!("Failed to bind client listener to {bind_addr}: {e}")
    })?;

    health_state.set_ready();
    info!(addr = %bind_addr, "Room service running - press Ctrl+C to shutdown");

    let app = build_router(state);
    let shutdown_health = Arc::clone(&health_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");
            // Mark as not ready immediately so traffic stops arriving
            shutdown_health.set_not_ready();
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Client server failed");
            e
        })?;

    // No new connections from here on
    connections.close();
    let grace = config.shutdown_grace();
    if tokio::time::timeout(grace, connections.wait()).await.is_err() {
        warn!(
            open = registry.connection_count().await,
            grace_seconds = grace.as_secs(),
            "Grace period elapsed, closing remaining connections"
        );
        connections_cancel.cancel();

        // Each leave path makes at most a few bounded backend calls
        let drain = config.backend_timeout() * 3 + FORCED_CLOSE_DRAIN;
        if tokio::time::timeout(drain, connections.wait()).await.is_err() {
            warn!("Some connections did not finish their leave path");
        }
    }

    shutdown_token.cancel();
    if let Err(e) = fanout_task.await {
        warn!(error = %e, "Fanout listener task failed");
    }

    info!("Room service shutdown complete");
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
