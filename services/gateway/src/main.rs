//! relay Gateway
//!
//! Process entry point: loads configuration, starts the broker connection
//! manager, and serves the HTTP API until shutdown.

use anyhow::Result;
use relay_broker::{manager, AmqpTransport};
use relay_gateway::{api, config, state::AppState};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to RELAY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting relay gateway");
    info!(
        listen_addr = %config.listen_addr,
        upstream_url = %config.upstream_url,
        "Configuration loaded"
    );

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the broker connection manager and arm the initial connect. A
    // broker that is down at startup is not fatal: the retry machinery takes
    // over and publishes fail until a connection is up.
    let transport = AmqpTransport::new(config.broker.clone());
    let broker = manager::spawn(transport, config.broker.clone(), shutdown_rx.clone());
    broker.ensure_connected().await;

    // Build and run the server
    let state = AppState::new(broker, &config)?;
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to the broker manager and the server
    let _ = shutdown_tx.send(true);

    info!("Gateway shutdown complete");
    Ok(())
}
