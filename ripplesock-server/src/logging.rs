//! Logging setup and server lifecycle events
//!
//! Library code logs through `tracing` unconditionally. The `logging`
//! feature adds [`init_logging`], which installs a `tracing-subscriber`
//! formatter filtered by `RUST_LOG`.

use crate::config::ServerConfig;
use ripplesock_core::CloseOutcome;
use std::net::SocketAddr;

/// Initialize logging subsystem
///
/// Reads the filter from `RUST_LOG`, defaulting to `info`. Fails if a global
/// subscriber is already installed.
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let directives = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    init_with_filter(&directives)
}

/// Initialize logging with explicit filter directives such as `ripplesock_core=debug`
#[cfg(feature = "logging")]
pub fn init_with_filter(directives: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_new(directives)?)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Initialize logging subsystem (no-op when logging feature is disabled)
#[cfg(not(feature = "logging"))]
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

pub(crate) fn log_server_start(config: &ServerConfig, local_addr: SocketAddr) {
    tracing::info!(
        %local_addr,
        max_connections = config.max_connections,
        handshake_timeout = ?config.handshake_timeout,
        close_timeout = ?config.close_timeout,
        "WebSocket server listening"
    );
}

pub(crate) fn log_connection_finished(peer: SocketAddr, outcome: CloseOutcome) {
    match outcome {
        CloseOutcome::Completed => tracing::info!(%peer, ?outcome, "WebSocket connection closed"),
        CloseOutcome::TimedOut | CloseOutcome::Aborted => {
            tracing::warn!(%peer, ?outcome, "WebSocket connection closed uncleanly")
        }
    }
}
