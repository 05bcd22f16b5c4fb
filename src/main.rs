//! Fee Portal server
//!
//! Serves the REST API and the `/ws` payment feed on one port.
//!
//! Usage:
//!   cargo run --bin load_data     # seed demo students
//!   cargo run --bin fee_portal    # start server (PORT / HTTP_ADDR, default 5000)

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use fee_portal::auth::TokenKeys;
use fee_portal::broadcast::Broadcaster;
use fee_portal::config::{Config, LogSettings};
use fee_portal::rest::{create_router, AppState};
use fee_portal::storage::Storage;
use fee_portal::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Flushes the file appender on drop
    let _guard = telemetry::init(&LogSettings::from_env());
    let config = Config::from_env();
    info!(?config, "starting fee portal");

    let storage = Storage::open(&config.data_dir)
        .with_context(|| format!("opening data dir {}", config.data_dir.display()))?;

    let keys = TokenKeys::new(config.jwt_secret.as_bytes(), config.token_ttl);
    let state = AppState::new(
        Arc::new(storage),
        keys,
        config.bcrypt_cost,
        Broadcaster::new(config.broadcast_capacity),
    );
    let app = create_router(state, config.cors_origin.as_deref());

    let listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("binding {}", config.http_addr))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
