//! RippleSock Server
//!
//! TCP front end for the RippleSock WebSocket engine: accept loop, request
//! head reading, 400 responses for refused upgrades, a connection limit and
//! graceful shutdown.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ripplesock_server::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), ServerError> {
//!     let server = Server::builder()
//!         .bind("0.0.0.0:8080")?
//!         .max_connections(10_000)
//!         .build()
//!         .await?;
//!
//!     server.serve(EchoHandler).await
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod server;

// Prelude module with common imports
pub mod prelude;

// Re-export key types for convenience
pub use config::ServerConfig;
pub use error::{ConfigError, Result, ServerError};
pub use server::{Server, ServerBuilder};
