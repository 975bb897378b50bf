//! WebSocket server implementation
//!
//! Accepts TCP streams, reads the HTTP request head under a timeout and size
//! cap, upgrades the stream and runs each connection on its own task.

use crate::config::ServerConfig;
use crate::error::{ConfigError, Result, ServerError};
use crate::logging::{log_connection_finished, log_server_start};
use ripplesock_core::{
    upgrade, CloseOutcome, CloseStatus, Handler, HandshakeError, HandshakeRequest, Sender,
};
use std::collections::HashMap;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Extra time granted to connections to finish their close during shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Senders of every upgraded connection, used to close them on shutdown
#[derive(Debug, Default)]
struct Registry {
    senders: Mutex<HashMap<u64, Sender>>,
}

impl Registry {
    fn insert(&self, sender: Sender) {
        self.lock().insert(sender.id(), sender);
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn snapshot(&self) -> Vec<Sender> {
        self.lock().values().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Sender>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds one slot of the connection limit until dropped
struct ConnectionSlot {
    active: Arc<watch::Sender<usize>>,
}

impl ConnectionSlot {
    fn acquire(active: &Arc<watch::Sender<usize>>, max: usize) -> Option<Self> {
        let mut acquired = false;
        active.send_if_modified(|count| {
            if *count < max {
                *count += 1;
                acquired = true;
            }
            acquired
        });

        acquired.then(|| Self {
            active: Arc::clone(active),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// WebSocket server
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    active: Arc<watch::Sender<usize>>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("local_addr", &self.listener.local_addr().ok())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

impl Server {
    /// Create a server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Validate `config` and bind its address
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_address).await?;
        log_server_start(&config, listener.local_addr()?);

        let (active, _) = watch::channel(0usize);
        Ok(Self {
            config,
            listener,
            active: Arc::new(active),
            registry: Arc::new(Registry::default()),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of connections currently held, including unfinished handshakes
    pub fn active_connections(&self) -> usize {
        *self.active.borrow()
    }

    /// Serve connections until Ctrl-C
    pub async fn serve<H>(self, handler: H) -> Result<()>
    where
        H: Handler,
    {
        self.serve_with_graceful_shutdown(handler, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve connections until `shutdown_signal` resolves.
    ///
    /// On shutdown the listener stops accepting, every open connection is sent
    /// a Going Away close, and the call waits up to the close timeout for them
    /// to finish.
    pub async fn serve_with_graceful_shutdown<H, F>(self, handler: H, shutdown_signal: F) -> Result<()>
    where
        H: Handler,
        F: Future<Output = ()> + Send,
    {
        let handler = Arc::new(handler);
        tokio::pin!(shutdown_signal);

        loop {
            tokio::select! {
                _ = &mut shutdown_signal => {
                    info!("Shutdown signal received");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer, &handler),
                        Err(e) => error!(error = %e, "Accept error"),
                    }
                }
            }
        }

        self.graceful_shutdown().await;
        Ok(())
    }

    fn spawn_connection<H>(&self, stream: TcpStream, peer: SocketAddr, handler: &Arc<H>)
    where
        H: Handler,
    {
        let Some(slot) = ConnectionSlot::acquire(&self.active, self.config.max_connections) else {
            warn!(
                %peer,
                max_connections = self.config.max_connections,
                "Connection limit reached, dropping connection"
            );
            return;
        };

        let handler = Arc::clone(handler);
        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        let span = info_span!("connection", %peer, id = tracing::field::Empty);

        tokio::spawn(
            async move {
                let _slot = slot;
                match handle_connection(stream, &config, handler.as_ref(), &registry).await {
                    Ok(outcome) => log_connection_finished(peer, outcome),
                    Err(e) => debug!(error = %e, "Connection ended before upgrade"),
                }
            }
            .instrument(span),
        );
    }

    async fn graceful_shutdown(&self) {
        let senders = self.registry.snapshot();
        info!(connections = senders.len(), "Closing open connections");
        for sender in senders {
            if let Err(e) = sender.close(CloseStatus::GoingAway, "Server shutdown").await {
                debug!(connection_id = sender.id(), error = %e, "Failed to send close");
            }
        }

        let mut active = self.active.subscribe();
        let drain = active.wait_for(|count| *count == 0);
        if tokio::time::timeout(self.config.close_timeout + SHUTDOWN_GRACE, drain)
            .await
            .is_err()
        {
            warn!(
                remaining = self.active_connections(),
                "Connections still open after shutdown grace period"
            );
        }
    }
}

/// Read the request head, upgrade, and run the connection to completion
async fn handle_connection<H>(
    stream: TcpStream,
    config: &ServerConfig,
    handler: &H,
    registry: &Registry,
) -> Result<CloseOutcome>
where
    H: Handler + ?Sized,
{
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    // The buffered reader stays with the stream so bytes sent right after the
    // request head are not lost.
    let mut stream = BufReader::new(stream);

    let request = match read_request(&mut stream, config).await {
        Ok(request) => request,
        Err(e) => {
            if let Some(response) = e.response() {
                warn!(error = %e, "Bad request");
                let _ = response.write_to(&mut stream).await;
                let _ = stream.shutdown().await;
            }
            return Err(e);
        }
    };

    let connection = match upgrade(&request, stream, config.connection_config()).await {
        Ok(connection) => connection,
        Err(rejected) => {
            let (error, mut stream) = rejected.into_parts();
            if error.is_not_upgrade() {
                debug!(error = %error, path = %request.path, "Refusing plain HTTP request");
            } else {
                warn!(error = %error, path = %request.path, "Handshake rejected");
            }
            if !matches!(error, HandshakeError::Io(_)) {
                let _ = error.response().write_to(&mut stream).await;
                let _ = stream.shutdown().await;
            }
            return Err(error.into());
        }
    };

    let id = connection.id();
    tracing::Span::current().record("id", id);
    registry.insert(connection.sender());
    let outcome = connection.run(handler).await;
    registry.remove(id);

    Ok(outcome)
}

/// Read an HTTP request head, bounded by the handshake timeout
async fn read_request<R>(reader: &mut R, config: &ServerConfig) -> Result<HandshakeRequest>
where
    R: AsyncBufRead + Unpin,
{
    let duration = config.handshake_timeout;
    tokio::time::timeout(duration, read_request_head(reader, config.max_header_size))
        .await
        .map_err(|_| ServerError::Timeout { duration })?
}

async fn read_request_head<R>(reader: &mut R, limit: usize) -> Result<HandshakeRequest>
where
    R: AsyncBufRead + Unpin,
{
    let mut head = Vec::with_capacity(1024);

    loop {
        // Never buffer more than one byte past the limit.
        let remaining = (limit + 1).saturating_sub(head.len()) as u64;
        let n = (&mut *reader).take(remaining).read_until(b'\n', &mut head).await?;

        if head.len() > limit {
            return Err(ServerError::RequestTooLarge { limit });
        }
        if n == 0 {
            return Err(ServerError::ConnectionClosedEarly);
        }
        if head.ends_with(b"\r\n\r\n") || head.ends_with(b"\n\n") {
            break;
        }
    }

    HandshakeRequest::parse(&head)?
        .ok_or_else(|| HandshakeError::Malformed("incomplete request head".to_string()).into())
}

/// Server builder
#[derive(Debug, Clone, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the given address
    pub fn bind<A: ToSocketAddrs>(mut self, addr: A) -> Result<Self> {
        self.config.bind_address = addr.to_socket_addrs()?.next().ok_or_else(|| {
            ConfigError::InvalidBindAddress("address resolved to nothing".to_string())
        })?;
        Ok(self)
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Set maximum request head size
    pub fn max_header_size(mut self, size: usize) -> Self {
        self.config.max_header_size = size;
        self
    }

    /// Set close timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Set read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = Some(timeout);
        self
    }

    /// Get the configuration built so far
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Validate the configuration and bind the listener
    pub async fn build(self) -> Result<Server> {
        Server::bind(self.config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_builder() {
        let builder = ServerBuilder::new()
            .bind("127.0.0.1:9001")
            .unwrap()
            .max_connections(1000)
            .handshake_timeout(Duration::from_secs(3))
            .close_timeout(Duration::from_secs(1));

        let config = builder.config();
        assert_eq!(config.bind_address, "127.0.0.1:9001".parse().unwrap());
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result = ServerBuilder::new()
            .bind("127.0.0.1:0")
            .unwrap()
            .max_connections(0)
            .build()
            .await;
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_connection_slots() {
        let (tx, _) = watch::channel(0usize);
        let active = Arc::new(tx);

        let first = ConnectionSlot::acquire(&active, 2).unwrap();
        let _second = ConnectionSlot::acquire(&active, 2).unwrap();
        assert!(ConnectionSlot::acquire(&active, 2).is_none());
        assert_eq!(*active.borrow(), 2);

        drop(first);
        assert_eq!(*active.borrow(), 1);
        assert!(ConnectionSlot::acquire(&active, 2).is_some());
    }

    #[tokio::test]
    async fn test_read_request_head() {
        let raw = b"GET /chat HTTP/1.1\r\nUpgrade: websocket\r\n\r\n\x81\x80";
        let mut reader = BufReader::new(&raw[..]);

        let request = read_request_head(&mut reader, 8192).await.unwrap();
        assert_eq!(request.path, "/chat");
        assert_eq!(request.header("upgrade"), Some("websocket"));

        // Bytes after the head stay in the reader.
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"\x81\x80");
    }

    #[tokio::test]
    async fn test_read_request_head_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"GET /split HTTP/1.1\r\nUpg")
            .read(b"rade: websocket\r\n")
            .read(b"\r\n")
            .build();
        let mut reader = BufReader::new(mock);

        let request = read_request_head(&mut reader, 8192).await.unwrap();
        assert_eq!(request.path, "/split");
        assert!(request.has_token("upgrade", "websocket"));
    }

    #[tokio::test]
    async fn test_read_request_head_limits() {
        let raw = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "a".repeat(500));
        let mut reader = BufReader::new(raw.as_bytes());
        assert!(matches!(
            read_request_head(&mut reader, 256).await,
            Err(ServerError::RequestTooLarge { limit: 256 })
        ));

        let mut reader = BufReader::new(&b"GET / HTTP/1.1\r\nHost: a\r\n"[..]);
        assert!(matches!(
            read_request_head(&mut reader, 8192).await,
            Err(ServerError::ConnectionClosedEarly)
        ));

        let mut reader = BufReader::new(&b"NOT HTTP\r\n\r\n"[..]);
        assert!(matches!(
            read_request_head(&mut reader, 8192).await,
            Err(ServerError::Handshake(HandshakeError::Malformed(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_request_times_out() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let config = ServerConfig {
            handshake_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let mut reader = BufReader::new(server);
        assert!(matches!(
            read_request(&mut reader, &config).await,
            Err(ServerError::Timeout { .. })
        ));
    }
}
