//! Server configuration
//!
//! This module provides configuration options for the WebSocket server.

use crate::error::ConfigError;
use ripplesock_core::protocol::constants::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, MAX_HEADER_SIZE,
};
use ripplesock_core::ConnectionConfig;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Smallest request head limit that can hold a minimal upgrade request
const MIN_HEADER_SIZE: usize = 128;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub bind_address: SocketAddr,
    /// Maximum concurrent connections, including ones still in the handshake
    pub max_connections: usize,
    /// How long a client may take to send its request head
    pub handshake_timeout: Duration,
    /// Maximum request head size in bytes
    pub max_header_size: usize,
    /// How long a connection waits for the peer's Close
    pub close_timeout: Duration,
    /// Optional bound on a single frame read
    pub read_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)),
            max_connections: 10_000,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_header_size: MAX_HEADER_SIZE,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            read_timeout: None,
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "handshake_timeout must be greater than 0".to_string(),
            ));
        }

        if self.close_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "close_timeout must be greater than 0".to_string(),
            ));
        }

        if matches!(self.read_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::InvalidTimeout(
                "read_timeout must be greater than 0 when set".to_string(),
            ));
        }

        if self.max_header_size < MIN_HEADER_SIZE {
            return Err(ConfigError::InvalidBufferSize(format!(
                "max_header_size must be at least {} bytes",
                MIN_HEADER_SIZE
            )));
        }

        Ok(())
    }

    /// Settings handed to each upgraded connection
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            close_timeout: self.close_timeout,
            read_timeout: self.read_timeout,
        }
    }
}
