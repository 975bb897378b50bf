//! Echo server
//!
//! Echoes every text and binary frame back to the sender.
//!
//! ```text
//! RUST_LOG=debug cargo run -p ripplesock-server --example echo_server
//! ```

use ripplesock_server::logging::init_logging;
use ripplesock_server::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging()?;

    let server = Server::builder()
        .bind("127.0.0.1:8080")?
        .max_connections(1000)
        .handshake_timeout(Duration::from_secs(10))
        .build()
        .await?;

    tracing::info!("Echo server ready on ws://{}", server.local_addr()?);

    let handler = from_fn(|payload, kind, sender: Sender| async move {
        if kind == DataKind::Text && &payload[..] == b"bye" {
            return sender.close(CloseStatus::Normal, "bye").await;
        }
        sender.send(payload, kind).await
    });

    server.serve(handler).await?;
    Ok(())
}
