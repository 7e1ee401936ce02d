//! Roomlink Relay
//!
//! Stateful WebSocket signaling server for mesh video calls.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Spawn the coordinator actor
//! 3. Start the health HTTP server (liveness, readiness)
//! 4. Bind the signaling listener and mark ready
//! 5. Accept connections until ctrl-c, then cancel the actor tree

#![warn(clippy::pedantic)]

use std::sync::Arc;

use relay::config::Config;
use relay::coordinator::CoordinatorActor;
use relay::health::{health_router, HealthState};
use relay::server;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Roomlink relay");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        kick_grace_ms = config.kick_grace.as_millis() as u64,
        "Configuration loaded successfully"
    );

    let root_token = CancellationToken::new();
    let (coordinator, coordinator_task) =
        CoordinatorActor::spawn(config.kick_grace, root_token.child_token());

    // Health endpoints on their own listener. Readiness probes the
    // coordinator itself, so a wedged actor drops out of rotation.
    let health_state = Arc::new(HealthState::new(coordinator.clone()));
    let health_listener = tokio::net::TcpListener::bind(&config.health_bind_address).await?;
    info!(addr = %health_listener.local_addr()?, "Health server listening");
    let health_token = root_token.child_token();
    let health_app = health_router(Arc::clone(&health_state));
    let health_task = tokio::spawn(async move {
        let shutdown = async move { health_token.cancelled().await };
        if let Err(e) = axum::serve(health_listener, health_app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "Health server failed");
        }
    });

    // Signaling listener.
    let listener = server::bind(&config.bind_address).await?;
    health_state.set_accepting();

    let accept_token = root_token.child_token();
    let accept_task = tokio::spawn(server::run(listener, coordinator.clone(), accept_token));

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    health_state.set_draining();
    root_token.cancel();

    let _ = accept_task.await;
    let _ = coordinator_task.await;
    let _ = health_task.await;

    info!("Roomlink relay stopped");
    Ok(())
}
