//! Error types for RippleSock
//!
//! Frame decoding, handshake validation and connection-level failures each
//! get their own enum; [`Error`] wraps them for callers that do not care
//! which layer failed.

use crate::protocol::http_status;
use std::io;
use thiserror::Error;

/// Result type alias for RippleSock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for RippleSock operations
#[derive(Error, Debug)]
pub enum Error {
    /// Frame errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Handshake errors
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A Close frame has already been sent; no more data may be written
    #[error("Writes closed, connection closing")]
    ConnectionClosing,

    /// The underlying stream has been shut down
    #[error("Connection closed")]
    Closed,
}

/// Wire-format violations and read failures while decoding a frame
#[derive(Error, Debug)]
pub enum FrameError {
    /// FIN bit was clear; message fragmentation is not supported
    #[error("Fragmentation not supported")]
    UnsupportedFragmentation,

    /// One of the RSV bits was set without a negotiated extension
    #[error("Extension not supported")]
    ExtensionNotSupported,

    /// Masking direction or length encoding violates RFC 6455
    #[error("Protocol error: {0}")]
    Protocol(&'static str),

    /// Payload needs the 64-bit length form, which is not supported
    #[error("Payload is too large")]
    PayloadTooLarge,

    /// The stream ended or failed in the middle of a frame
    #[error("Could not read frame: {0}")]
    Read(#[source] io::Error),
}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        FrameError::Read(err)
    }
}

/// Reasons an upgrade request is refused
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// `Connection` header missing or without the `upgrade` token
    #[error("Missing Connection upgrade header")]
    MissingConnectionUpgrade,

    /// `Upgrade` header missing or not `websocket`
    #[error("Provided upgrade not supported")]
    UnsupportedUpgrade,

    /// `Sec-WebSocket-Key` missing or empty
    #[error("Bad handshake")]
    BadHandshake,

    /// `Sec-WebSocket-Version` is not exactly `13`
    #[error("Unsupported version")]
    UnsupportedVersion,

    /// The request head could not be parsed
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// Writing the handshake response failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl HandshakeError {
    /// HTTP status the HTTP layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            HandshakeError::Io(_) => http_status::INTERNAL_SERVER_ERROR,
            _ => http_status::BAD_REQUEST,
        }
    }

    /// True when the request was not a WebSocket upgrade at all
    pub fn is_not_upgrade(&self) -> bool {
        matches!(
            self,
            HandshakeError::MissingConnectionUpgrade | HandshakeError::UnsupportedUpgrade
        )
    }
}
