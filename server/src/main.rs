//! Relay Server - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use relay_server::{api, config, observability, store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    observability::init_tracing(config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Relay Server"
    );

    // Registrations and blacklist
    let relay_file = store::file::load_or_create(
        &config.registration_path,
        store::RelayFile::default(),
    )
    .context("Failed to load registration file")?;
    let blacklist = store::Blacklist::load_or_create(&config.blacklist_path)
        .context("Failed to load blacklist")?;

    let bind_address = config
        .bind_address
        .clone()
        .unwrap_or_else(|| relay_file.bind_address());
    let registrations = relay_file.to_store();
    info!(
        bots = registrations.len(),
        blacklisted = blacklist.len(),
        "Registrations loaded"
    );

    // Build application state
    let state = api::AppState::new(config, Arc::new(registrations), blacklist)?;

    // Build router
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!("[http] Listening on http://{bind_address}");
    info!("[ws] Listening on ws://{bind_address}/webhook");

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    info!("Server shutdown complete");

    Ok(())
}
