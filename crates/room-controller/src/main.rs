//! Room Controller
//!
//! Session core for a native meeting-room control runtime.
//!
//! # Servers
//!
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Start the controller (runtime init, paired rooms, heartbeat)
//! 4. Start health HTTP server (liveness, readiness, metrics)
//! 5. Wait for a shutdown signal or a fatal pump failure
//!
//! A pump failure exits with a non-zero status after the same ordered
//! shutdown a signal triggers.

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;

use room_controller::config::Config;
use room_controller::errors::RoomError;
use room_controller::native::loopback::LoopbackRuntime;
use room_controller::native::NativeRuntime;
use room_controller::observability::{init_metrics_recorder, service_router, HealthState};
use room_controller::RoomController;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        content_dir = %config.content_dir.display(),
        health_bind_address = %config.health_bind_address,
        heartbeat_interval_ms = config.heartbeat_interval.as_millis(),
        subscriber_queue_capacity = config.subscriber_queue_capacity,
        pairing_timeout_seconds = config.pairing_timeout.as_secs(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    // No vendor library is linked into this binary
    warn!("Using the loopback native runtime; rooms are simulated in-process");
    let runtime: Arc<dyn NativeRuntime> = Arc::new(LoopbackRuntime::new());

    let controller = RoomController::start(runtime, config.controller_settings())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to start room controller");
            e
        })?;
    info!(rooms = controller.list_rooms().await.len(), "Room controller started");

    let shutdown_token = CancellationToken::new();

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let app = service_router(Arc::clone(&health_state), prometheus_handle)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    health_state.set_ready();
    info!("Room Controller running - press Ctrl+C to shutdown");

    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
        }
        () = controller.fatal_failure() => {
            error!("Heartbeat pump failed, shutting down");
        }
    }

    health_state.set_not_ready();

    let result = controller.shutdown().await;

    shutdown_token.cancel();
    if let Err(e) = health_task.await {
        warn!(error = %e, "Health server task ended abnormally");
    }

    match result {
        Ok(()) => {
            info!("Room Controller shutdown complete");
            Ok(())
        }
        Err(e @ RoomError::PumpFailure(_)) => {
            error!(error = %e, "Room Controller stopped after a fatal pump failure");
            Err(e.into())
        }
        Err(e) => {
            warn!(error = %e, "Room Controller shutdown completed with errors");
            Err(e.into())
        }
    }
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
