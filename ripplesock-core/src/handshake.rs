//! WebSocket opening handshake
//!
//! Parses an HTTP/1.1 request head, validates the upgrade headers and turns
//! the accepted stream into an open [`Connection`]. Rejected requests hand the
//! stream back so the HTTP layer can answer them.

use crate::connection::{Connection, ConnectionConfig};
use crate::error::HandshakeError;
use crate::protocol::constants::*;
use crate::protocol::http_header::*;
use crate::protocol::http_status::{self, *};
use base64::{engine::general_purpose, Engine as _};
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Maximum number of header lines accepted in a request head
const MAX_HEADERS: usize = 64;

/// A parsed HTTP request head
///
/// Header names keep their original spelling and order; duplicates are
/// preserved so multi-line headers can be inspected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// HTTP method
    pub method: String,
    /// Request target
    pub path: String,
    /// HTTP headers in arrival order
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Create a request with no headers
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
        }
    }

    /// Build a standard client upgrade request for `path`
    pub fn client(path: impl Into<String>, host: &str, key: &str) -> Self {
        Self::new("GET", path)
            .with_header("Host", host)
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Key", key)
            .with_header("Sec-WebSocket-Version", WEBSOCKET_VERSION)
    }

    /// Append a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Parse a request head.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold the complete head.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, HandshakeError> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        match req.parse(buf) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(HandshakeError::Malformed(e.to_string())),
        }

        let method = req
            .method
            .ok_or_else(|| HandshakeError::Malformed("missing method".to_string()))?;
        let path = req
            .path
            .ok_or_else(|| HandshakeError::Malformed("missing request target".to_string()))?;

        let mut parsed = Self::new(method, path);
        for header in req.headers.iter() {
            let value = std::str::from_utf8(header.value).map_err(|_| {
                HandshakeError::Malformed(format!("header {} is not valid UTF-8", header.name))
            })?;
            parsed.headers.push((header.name.to_string(), value.trim().to_string()));
        }

        Ok(Some(parsed))
    }

    /// First value of header `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of header `name`, in arrival order
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether any comma-separated token of header `name` equals `token`
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.header_values(name)
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Check the upgrade headers, returning the client's key on success
    pub fn validate(&self) -> Result<&str, HandshakeError> {
        if !self.has_token(CONNECTION, "upgrade") {
            return Err(HandshakeError::MissingConnectionUpgrade);
        }
        if !self.has_token(UPGRADE, "websocket") {
            return Err(HandshakeError::UnsupportedUpgrade);
        }

        let key = self
            .header(SEC_WEBSOCKET_KEY)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(HandshakeError::BadHandshake)?;

        // A list of versions is refused, even one that contains 13.
        let mut versions = self
            .header_values(SEC_WEBSOCKET_VERSION)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty());
        match (versions.next(), versions.next()) {
            (Some(WEBSOCKET_VERSION), None) => Ok(key),
            _ => Err(HandshakeError::UnsupportedVersion),
        }
    }

    /// Serialize the request head
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(format!("{} {} HTTP/1.1\r\n", self.method, self.path).as_bytes());
        for (name, value) in &self.headers {
            buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        buf.put_slice(b"\r\n");
        buf.freeze()
    }
}

/// An HTTP response written during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code
    pub status: u16,
    /// HTTP headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
}

impl HandshakeResponse {
    /// The 101 response that completes an upgrade
    pub fn switching_protocols(accept: &str) -> Self {
        Self {
            status: SWITCHING_PROTOCOLS,
            headers: vec![
                ("Upgrade".to_string(), "websocket".to_string()),
                ("Connection".to_string(), "Upgrade".to_string()),
                ("Sec-WebSocket-Accept".to_string(), accept.to_string()),
            ],
            body: Bytes::new(),
        }
    }

    /// A plain-text error response that closes the connection
    pub fn error(status: u16, message: &str) -> Self {
        let body = Bytes::copy_from_slice(message.as_bytes());
        Self {
            status,
            headers: vec![
                ("Content-Type".to_string(), "text/plain; charset=utf-8".to_string()),
                ("Content-Length".to_string(), body.len().to_string()),
                ("Connection".to_string(), "close".to_string()),
            ],
            body,
        }
    }

    /// A 400 Bad Request response
    pub fn bad_request(message: &str) -> Self {
        Self::error(BAD_REQUEST, message)
    }

    /// First value of header `name`, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Serialize status line, headers and body
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128 + self.body.len());
        buf.put_slice(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status,
                http_status::reason_phrase(self.status)
            )
            .as_bytes(),
        );
        for (name, value) in &self.headers {
            buf.put_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);
        buf.freeze()
    }

    /// Write the response to `stream` and flush it
    pub async fn write_to<W>(&self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(&self.to_bytes()).await?;
        stream.flush().await
    }
}

impl HandshakeError {
    /// The plain-text response the HTTP layer should send for this error
    pub fn response(&self) -> HandshakeResponse {
        HandshakeResponse::error(self.status_code(), &self.to_string())
    }
}

/// A refused upgrade, carrying the stream back to the caller
pub struct Rejected<S> {
    /// Why the upgrade was refused
    pub error: HandshakeError,
    /// The untouched client stream
    pub stream: S,
}

impl<S> Rejected<S> {
    /// Split into the error and the stream
    pub fn into_parts(self) -> (HandshakeError, S) {
        (self.error, self.stream)
    }
}

impl<S> fmt::Debug for Rejected<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected").field("error", &self.error).finish_non_exhaustive()
    }
}

impl<S> fmt::Display for Rejected<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upgrade rejected: {}", self.error)
    }
}

/// Generate a random WebSocket key
pub fn generate_key() -> String {
    use rand::RngCore;
    let mut key_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key_bytes);
    general_purpose::STANDARD.encode(key_bytes)
}

/// Compute WebSocket accept key from client key
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_MAGIC.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Validate `request`, write the 101 response and take ownership of `stream`.
///
/// Nothing is written on rejection; the caller decides how to answer.
pub async fn upgrade<S>(
    request: &HandshakeRequest,
    mut stream: S,
    config: ConnectionConfig,
) -> Result<Connection<S>, Rejected<S>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let accept = match request.validate() {
        Ok(key) => compute_accept_key(key),
        Err(error) => {
            tracing::debug!(path = %request.path, error = %error, "Rejecting upgrade request");
            return Err(Rejected { error, stream });
        }
    };

    let response = HandshakeResponse::switching_protocols(&accept);
    if let Err(e) = response.write_to(&mut stream).await {
        return Err(Rejected {
            error: HandshakeError::Io(e),
            stream,
        });
    }

    let connection = Connection::from_upgraded(stream, config);
    tracing::info!(connection_id = connection.id(), path = %request.path, "WebSocket handshake completed");
    Ok(connection)
}
