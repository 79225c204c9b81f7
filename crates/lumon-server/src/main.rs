//! # Lumon Server
//!
//! Entry point for the auth gate.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logging + metrics registry)
//! 2. Load `AuthConfig` from the environment and validate it
//! 3. Wire the in-memory store into the auth core
//! 4. Serve the router until Ctrl+C
//! 5. Drain the background tail and exit

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use lumon_auth::{AuthConfig, AuthCore, AuthPorts, InMemoryStore, SystemClock};
use lumon_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry =
        init_telemetry(TelemetryConfig::from_env()).context("failed to initialize telemetry")?;

    let config = AuthConfig::from_env().context("failed to load configuration")?;
    config.validate().context("refusing to start with insecure configuration")?;
    let addr = config.http.addr();

    let store = Arc::new(InMemoryStore::new());
    let core = Arc::new(
        AuthCore::new(config, AuthPorts::in_memory(store), Arc::new(SystemClock))
            .context("failed to build auth core")?,
    );
    let app = lumon_auth::http::router(core.clone());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Lumon auth gate listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    core.shutdown().await;
    info!("Lumon auth gate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
