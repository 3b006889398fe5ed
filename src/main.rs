//! Identity gateway binary.
//!
//! Boots the dispatch core: loads configuration, initializes logging and
//! the metrics endpoint, builds the gateway, and serves until shutdown.

use std::path::Path;
use std::sync::Arc;

use axum::http::HeaderName;
use tokio::net::TcpListener;

use identity_gateway::config::{loader::load_config, GatewayConfig};
use identity_gateway::gateway::identity::TrustedHeaderResolver;
use identity_gateway::gateway::Gateway;
use identity_gateway::observability;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => GatewayConfig::default(),
    };

    observability::logging::init(&config.observability.log_level);

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        skip_tls_verification = config.upstream.skip_tls_verification,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let resolver = Arc::new(TrustedHeaderResolver::new(HeaderName::try_from(
        config.auth.trusted_identity_header.as_str(),
    )?));
    let gateway = Gateway::new(&config, resolver)?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    axum::serve(listener, gateway.into_router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
    }
    tracing::info!("Shutdown signal received");
}
