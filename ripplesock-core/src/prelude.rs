//! Prelude module for RippleSock Core
//!
//! This module re-exports commonly used types and traits to make them
//! easily accessible for users of the library.

pub use crate::close::CloseStatus;
pub use crate::connection::{CloseOutcome, Connection, ConnectionConfig, DataKind, Sender};
pub use crate::error::{Error, Result};
pub use crate::frame::Frame;
pub use crate::handler::{from_fn, EchoHandler, Handler};
pub use crate::handshake::{upgrade, HandshakeRequest};
pub use crate::protocol::Opcode;

// Re-export commonly used external dependencies
pub use async_trait::async_trait;
pub use bytes::{Bytes, BytesMut};
pub use tokio::io::{AsyncRead, AsyncWrite};
