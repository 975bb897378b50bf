//! Prelude module with common imports
//!
//! This module re-exports the most commonly used types and traits
//! from the ripplesock-server crate for ergonomic imports.

// Server types
pub use crate::config::ServerConfig;
pub use crate::error::ServerError;
pub use crate::server::{Server, ServerBuilder};

// Re-export core types
pub use ripplesock_core::prelude::*;
