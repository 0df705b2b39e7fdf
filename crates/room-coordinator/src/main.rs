//! Room Coordinator service binary.
//!
//! # Servers
//!
//! - HTTP API for room state and moderation (default: 0.0.0.0:8080)
//! - HTTP server for health probes and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Install the Prometheus metrics recorder
//! 3. Spawn the actor system (`RoomRegistryActor`)
//! 4. Start the health server (liveness, readiness, `/metrics`)
//! 5. Start the API server
//! 6. Mark ready, wait for a shutdown signal
//! 7. Drain: not-ready, cancel servers, shut the registry down

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use room_coordinator::actors::{ActorMetrics, RoomRegistryActor, RoomSettings};
use room_coordinator::api::{api_router, ApiState};
use room_coordinator::config::Config;
use room_coordinator::media::NoopMediaControl;
use room_coordinator::observability::{health_router, HealthState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Coordinator");

    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        coordinator_id = %config.coordinator_id,
        http_bind_address = %config.http_bind_address,
        health_bind_address = %config.health_bind_address,
        empty_room_grace_seconds = config.empty_room_grace_seconds,
        heartbeat_timeout_seconds = config.heartbeat_timeout_seconds,
        command_timeout_ms = config.command_timeout_ms,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded.
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus metrics recorder")?;

    let health_state = Arc::new(HealthState::new());

    info!("Initializing actor system...");
    let actor_metrics = ActorMetrics::new();
    let (registry, registry_task) = RoomRegistryActor::spawn(
        config.coordinator_id.clone(),
        RoomSettings::from_config(&config),
        Arc::new(NoopMediaControl),
        Arc::clone(&actor_metrics),
    );
    info!("Actor system initialized");

    let shutdown_token = CancellationToken::new();

    // Health server: probes plus the Prometheus /metrics endpoint.
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("Invalid health bind address {}", config.health_bind_address))?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind before spawning to fail fast on bind errors.
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;

    let health_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    // API server.
    let api_addr: SocketAddr = config
        .http_bind_address
        .parse()
        .with_context(|| format!("Invalid API bind address {}", config.http_bind_address))?;

    let api_app = api_router(ApiState {
        registry: registry.clone(),
        coordinator_id: config.coordinator_id.clone(),
    });

    let api_listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("Failed to bind API server to {api_addr}"))?;

    let api_shutdown = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %api_addr, "API server starting");
        let server = axum::serve(api_listener, api_app).with_graceful_shutdown(async move {
            api_shutdown.cancelled().await;
            info!("API server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "API server failed");
        }
    });
    info!(addr = %api_addr, "API server started");

    health_state.set_ready();
    info!("Room Coordinator running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Drain: stop advertising readiness before tearing anything down.
    health_state.set_not_ready();
    shutdown_token.cancel();

    // Let the servers finish in-flight requests.
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Shut the actor system down: every room broadcasts its end and
    // closes its sessions before the registry exits.
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Actor system shutdown error");
    }
    if let Err(e) = tokio::time::timeout(Duration::from_secs(30), registry_task).await {
        warn!(error = %e, "Registry task did not stop within shutdown timeout");
    }

    info!("Room Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable
/// because without signal handlers, we cannot gracefully shut down the
/// service.
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
