//! Server error types
//!
//! Everything that can go wrong between accepting a TCP stream and handing
//! it to a connection task. Protocol failures after the upgrade never reach
//! this layer; the connection turns them into close frames.

use ripplesock_core::error::HandshakeError;
use ripplesock_core::HandshakeResponse;
use std::io;
use std::time::Duration;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The upgrade request was refused or could not be parsed
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// The request head did not arrive in time
    #[error("Operation timed out after {duration:?}")]
    Timeout {
        /// How long we waited
        duration: Duration,
    },

    /// The request head exceeded the configured size
    #[error("Request head exceeds {limit} bytes")]
    RequestTooLarge {
        /// Configured limit in bytes
        limit: usize,
    },

    /// The client went away before sending a complete request head
    #[error("Connection closed before the request was complete")]
    ConnectionClosedEarly,
}

impl ServerError {
    /// The HTTP response to send before dropping the stream, if any
    pub fn response(&self) -> Option<HandshakeResponse> {
        match self {
            ServerError::Handshake(HandshakeError::Io(_)) => None,
            ServerError::Handshake(e) => Some(e.response()),
            ServerError::Timeout { .. } | ServerError::RequestTooLarge { .. } => {
                Some(HandshakeResponse::bad_request(&self.to_string()))
            }
            _ => None,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid bind address
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    /// Invalid timeout value
    #[error("Invalid timeout value: {0}")]
    InvalidTimeout(String),

    /// Invalid buffer size
    #[error("Invalid buffer size: {0}")]
    InvalidBufferSize(String),

    /// Invalid connection limit
    #[error("Invalid connection limit: {0}")]
    InvalidLimit(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::Timeout {
            duration: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "Operation timed out after 10s");

        let err = ServerError::from(ConfigError::InvalidLimit("zero".to_string()));
        assert_eq!(err.to_string(), "Configuration error: Invalid connection limit: zero");
    }

    #[test]
    fn test_error_responses() {
        let err = ServerError::from(HandshakeError::UnsupportedVersion);
        let response = err.response().unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(&response.body[..], b"Unsupported version");

        let err = ServerError::RequestTooLarge { limit: 8192 };
        assert_eq!(err.response().unwrap().status, 400);

        assert!(ServerError::ConnectionClosedEarly.response().is_none());
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert!(ServerError::from(HandshakeError::Io(io)).response().is_none());
    }
}
