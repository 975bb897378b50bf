//! Per-connection state machine
//!
//! A [`Connection`] owns an upgraded stream. [`Connection::run`] drives the
//! read loop: it answers pings, forwards data frames to a [`Handler`] and
//! carries out the closing handshake. A locally initiated close spawns a timer
//! that races the read loop; whichever side finishes first shuts the stream
//! down, and it is shut down exactly once.

use crate::close::{parse_close_payload, CloseStatus};
use crate::error::{Error, FrameError, Result};
use crate::frame::{Frame, FrameReader, FrameWriter};
use crate::handler::Handler;
use crate::protocol::{constants::DEFAULT_CLOSE_TIMEOUT, Opcode};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long to wait for the peer's Close after sending ours
    pub close_timeout: Duration,
    /// Upper bound on a single frame read; `None` waits forever
    pub read_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            read_timeout: None,
        }
    }
}

impl ConnectionConfig {
    /// Set the close timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Data may flow both ways
    Open,
    /// We sent Close and are waiting for the peer's
    ClosingLocallyInitiated,
    /// The peer sent Close and we answered it
    ClosingPeerInitiated,
    /// The stream has been shut down
    Closed,
}

/// How a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Both Close frames were exchanged
    Completed,
    /// We sent Close and the peer never answered within the timeout
    TimedOut,
    /// The stream failed before the closing handshake finished
    Aborted,
}

/// Kind of a data message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// UTF-8 text
    Text,
    /// Arbitrary bytes
    Binary,
}

impl DataKind {
    /// Opcode carrying this kind on the wire
    pub fn opcode(&self) -> Opcode {
        match self {
            DataKind::Text => Opcode::Text,
            DataKind::Binary => Opcode::Binary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Running,
    Stopping,
    Done,
}

struct CloseState {
    phase: ConnectionState,
    completion: Option<oneshot::Sender<()>>,
    outcome: Option<CloseOutcome>,
}

type BoxedWriter = FrameWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// State shared by the read loop, the close timer and every [`Sender`]
struct Shared {
    id: u64,
    /// Taken and dropped at shutdown, so held [`Sender`]s do not keep the
    /// stream open
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    state: Mutex<CloseState>,
    teardown: watch::Sender<Teardown>,
    close_timeout: Duration,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, CloseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn phase(&self) -> ConnectionState {
        self.lock_state().phase
    }

    /// Resolves once teardown has started
    async fn stopping(&self) {
        let mut teardown = self.teardown.subscribe();
        let _ = teardown.wait_for(|t| *t != Teardown::Running).await;
    }

    /// Abort the connection if `result` is an I/O failure
    async fn check_write(&self, result: Result<()>) -> Result<()> {
        if let Err(Error::Io(e)) = &result {
            debug!(connection_id = self.id, error = %e, "Write failed");
            self.shutdown(CloseOutcome::Aborted).await;
        }
        result
    }

    /// Write one frame. Gives up, including while waiting for the lock, once
    /// teardown starts.
    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        tokio::select! {
            result = async {
                match self.writer.lock().await.as_mut() {
                    Some(writer) => writer.write_frame(frame).await,
                    None => Err(Error::Closed),
                }
            } => result,
            _ = self.stopping() => Err(Error::Closed),
        }
    }

    async fn send_data(&self, payload: Bytes, kind: DataKind) -> Result<()> {
        let bytes = Frame::new(kind.opcode(), payload).encode()?;

        let result = tokio::select! {
            result = async {
                // Phase is checked under the write lock so no data frame can
                // follow our Close on the wire.
                let mut writer = self.writer.lock().await;
                match self.phase() {
                    ConnectionState::Open => {}
                    ConnectionState::Closed => return Err(Error::Closed),
                    _ => return Err(Error::ConnectionClosing),
                }
                match writer.as_mut() {
                    Some(writer) => writer.write_raw(&bytes).await,
                    None => Err(Error::Closed),
                }
            } => result,
            _ = self.stopping() => Err(Error::Closed),
        };
        self.check_write(result).await
    }

    async fn send_pong(&self, payload: Bytes) -> Result<()> {
        let result = self.write_frame(&Frame::pong(payload)).await;
        self.check_write(result).await
    }

    /// Send a Close frame unless one was already sent, then wait for the
    /// peer's under the close timeout.
    async fn initiate_close(self: &Arc<Self>, status: CloseStatus, reason: &str) -> Result<()> {
        let completion = {
            let mut state = self.lock_state();
            if state.phase != ConnectionState::Open {
                return Ok(());
            }
            state.phase = ConnectionState::ClosingLocallyInitiated;
            let (tx, rx) = oneshot::channel();
            state.completion = Some(tx);
            rx
        };

        // Armed before the write: a peer that stops reading must not hold the
        // close open.
        self.spawn_close_timer(completion);

        let result = self.write_frame(&Frame::close(status, reason)).await;
        self.check_write(result).await?;
        info!(connection_id = self.id, %status, reason, "Close sent");
        Ok(())
    }

    fn spawn_close_timer(self: &Arc<Self>, completion: oneshot::Receiver<()>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(shared.close_timeout, completion).await {
                Ok(Ok(())) => CloseOutcome::Completed,
                // Completion sender dropped: someone else already shut down.
                Ok(Err(_)) => return,
                Err(_) => {
                    warn!(
                        connection_id = shared.id,
                        timeout = ?shared.close_timeout,
                        "Peer did not answer Close in time"
                    );
                    CloseOutcome::TimedOut
                }
            };
            shared.shutdown(outcome).await;
        });
    }

    /// Handle the peer's Close frame.
    async fn receive_close(&self) -> Result<()> {
        let phase = {
            let mut state = self.lock_state();
            let phase = state.phase;
            match phase {
                ConnectionState::Open => state.phase = ConnectionState::ClosingPeerInitiated,
                ConnectionState::ClosingLocallyInitiated => {
                    if let Some(tx) = state.completion.take() {
                        let _ = tx.send(());
                    }
                }
                _ => {}
            }
            phase
        };

        match phase {
            ConnectionState::Open => {
                let status = CloseStatus::Normal;
                let result = self.write_frame(&Frame::close(status, status.reason())).await;
                let outcome = if result.is_ok() {
                    CloseOutcome::Completed
                } else {
                    CloseOutcome::Aborted
                };
                self.shutdown(outcome).await;
                result
            }
            ConnectionState::ClosingLocallyInitiated => {
                self.shutdown(CloseOutcome::Completed).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Shut the stream down if nobody has yet. Returns whether this call did it.
    ///
    /// Must not be called while holding the writer lock.
    async fn shutdown(&self, outcome: CloseOutcome) -> bool {
        {
            let mut state = self.lock_state();
            if state.phase == ConnectionState::Closed {
                return false;
            }
            state.phase = ConnectionState::Closed;
            state.outcome = Some(outcome);
            state.completion = None;
        }

        // Stopping also cancels any write still blocked on the peer.
        self.teardown.send_replace(Teardown::Stopping);
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!(connection_id = self.id, error = %e, "Stream shutdown failed");
            }
        }
        self.teardown.send_replace(Teardown::Done);

        info!(connection_id = self.id, ?outcome, "Connection closed");
        true
    }
}

/// Handle for writing to a connection from application code
///
/// Cheap to clone; every clone refers to the same connection.
#[derive(Clone)]
pub struct Sender {
    shared: Arc<Shared>,
}

impl Sender {
    /// Connection id
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.phase()
    }

    /// Send a data frame.
    ///
    /// Fails with [`Error::ConnectionClosing`] once a Close frame has been sent.
    pub async fn send(&self, payload: impl Into<Bytes>, kind: DataKind) -> Result<()> {
        self.shared.send_data(payload.into(), kind).await
    }

    /// Send a text frame
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Bytes::from(text.into()), DataKind::Text).await
    }

    /// Send a binary frame
    pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(data, DataKind::Binary).await
    }

    /// Start the closing handshake; a no-op if a Close was already sent
    pub async fn close(&self, status: CloseStatus, reason: &str) -> Result<()> {
        self.shared.initiate_close(status, reason).await
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("id", &self.shared.id)
            .field("state", &self.shared.phase())
            .finish()
    }
}

/// An upgraded WebSocket connection
pub struct Connection<S> {
    reader: FrameReader<BufReader<ReadHalf<S>>>,
    shared: Arc<Shared>,
    teardown: watch::Receiver<Teardown>,
    config: ConnectionConfig,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wrap a stream whose handshake has already completed
    pub fn from_upgraded(stream: S, config: ConnectionConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        let (teardown_tx, teardown_rx) = watch::channel(Teardown::Running);

        let shared = Arc::new(Shared {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            writer: tokio::sync::Mutex::new(Some(FrameWriter::new(writer))),
            state: Mutex::new(CloseState {
                phase: ConnectionState::Open,
                completion: None,
                outcome: None,
            }),
            teardown: teardown_tx,
            close_timeout: config.close_timeout,
        });

        Self {
            reader: FrameReader::new(BufReader::new(read_half)),
            shared,
            teardown: teardown_rx,
            config,
        }
    }

    /// Connection id, unique within the process
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.phase()
    }

    /// A handle for writing to this connection
    pub fn sender(&self) -> Sender {
        Sender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Start the closing handshake
    pub async fn close(&self, status: CloseStatus, reason: &str) -> Result<()> {
        self.shared.initiate_close(status, reason).await
    }

    /// Run the read loop until the stream is shut down.
    pub async fn run<H>(mut self, handler: &H) -> CloseOutcome
    where
        H: Handler + ?Sized,
    {
        let sender = self.sender();
        let id = self.shared.id;
        let read_timeout = self.config.read_timeout;

        // After a decode error only the peer's Close is acted on, and a
        // second error ends reading.
        let mut framing_lost = false;

        loop {
            if *self.teardown.borrow_and_update() != Teardown::Running {
                break;
            }

            let result = tokio::select! {
                biased;
                _ = self.teardown.changed() => continue,
                result = read_next(&mut self.reader, read_timeout) => result,
            };

            let frame = match result {
                Ok(frame) => frame,
                Err(e) if framing_lost => {
                    debug!(connection_id = id, error = %e, "Stopped reading after repeated decode failure");
                    break;
                }
                Err(e) => {
                    warn!(connection_id = id, error = %e, "Failed to decode frame");
                    let status = CloseStatus::ProtocolError;
                    let _ = self.shared.initiate_close(status, status.reason()).await;
                    framing_lost = true;
                    continue;
                }
            };

            debug!(
                connection_id = id,
                opcode = %frame.opcode,
                len = frame.payload_len(),
                masked = frame.masked,
                "Received frame"
            );

            if framing_lost && frame.opcode != Opcode::Close {
                continue;
            }
            if !self.dispatch(frame, handler, &sender).await {
                break;
            }
        }

        while *self.teardown.borrow_and_update() != Teardown::Done {
            if self.teardown.changed().await.is_err() {
                break;
            }
        }

        self.shared
            .lock_state()
            .outcome
            .unwrap_or(CloseOutcome::Aborted)
    }

    /// Act on one frame. Returns false when reading must stop.
    async fn dispatch<H>(&self, frame: Frame, handler: &H, sender: &Sender) -> bool
    where
        H: Handler + ?Sized,
    {
        let id = self.shared.id;

        match frame.opcode {
            Opcode::Ping => {
                if let Err(e) = self.shared.send_pong(frame.payload).await {
                    debug!(connection_id = id, error = %e, "Failed to answer ping");
                }
                true
            }
            Opcode::Pong => true,
            Opcode::Close => {
                match parse_close_payload(&frame.payload) {
                    Some((code, reason)) => info!(connection_id = id, code, %reason, "Close received"),
                    None => info!(connection_id = id, "Close received without status"),
                }
                if let Err(e) = self.shared.receive_close().await {
                    debug!(connection_id = id, error = %e, "Failed to answer close");
                }
                false
            }
            Opcode::Continuation => {
                warn!(connection_id = id, "Continuation frame received");
                let _ = self
                    .shared
                    .initiate_close(CloseStatus::ProtocolError, "Fragmentation unsupported")
                    .await;
                true
            }
            Opcode::Text | Opcode::Binary => {
                let kind = if frame.opcode == Opcode::Text {
                    DataKind::Text
                } else {
                    DataKind::Binary
                };
                if let Err(e) = handler.on_data(frame.payload, kind, sender.clone()).await {
                    warn!(connection_id = id, error = %e, "Handler failed");
                    let status = CloseStatus::InternalError;
                    let _ = self.shared.initiate_close(status, status.reason()).await;
                }
                true
            }
            reserved => {
                warn!(connection_id = id, opcode = %reserved, "Reserved opcode received");
                let status = CloseStatus::PolicyViolation;
                let _ = self.shared.initiate_close(status, status.reason()).await;
                true
            }
        }
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.shared.phase())
            .field("config", &self.config)
            .finish()
    }
}

async fn read_next<R>(
    reader: &mut FrameReader<R>,
    timeout: Option<Duration>,
) -> std::result::Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    match timeout {
        None => reader.read_frame().await,
        Some(limit) => match tokio::time::timeout(limit, reader.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(FrameError::Read(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "frame read timed out",
            ))),
        },
    }
}
