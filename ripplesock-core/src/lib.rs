//! # RippleSock Core
//!
//! WebSocket protocol engine for RippleSock
//!
//! This crate implements the server side of RFC 6455 without fragmentation or
//! extensions. It includes:
//!
//! - A frame codec with strict wire-format validation
//! - Opening handshake validation and the 101 response
//! - A per-connection state machine that answers control frames and runs the
//!   closing handshake under a timeout
//! - The [`Handler`] trait through which applications receive data

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

// Core modules
pub mod close;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handler;
pub mod handshake;
pub mod protocol;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use close::CloseStatus;
pub use connection::{
    CloseOutcome, Connection, ConnectionConfig, ConnectionState, DataKind, Sender,
};
pub use error::{Error, FrameError, HandshakeError, Result};
pub use frame::{Frame, FrameReader, FrameWriter, Role};
pub use handler::{from_fn, EchoHandler, Handler};
pub use handshake::{upgrade, HandshakeRequest, HandshakeResponse, Rejected};
pub use protocol::Opcode;
