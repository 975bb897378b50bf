//! Close status codes and close-frame payloads

use crate::protocol::constants::MAX_CLOSE_REASON_SIZE;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Close status codes the engine sends, as defined in RFC 6455 Section 7.4.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseStatus {
    /// Normal closure
    Normal,
    /// Endpoint is going away
    GoingAway,
    /// Protocol error
    ProtocolError,
    /// Received a data type it cannot accept
    UnsupportedData,
    /// Text payload was not valid UTF-8
    InvalidUtf8,
    /// Generic policy violation
    PolicyViolation,
    /// Message too big to process
    MessageTooBig,
    /// Unexpected condition on the server
    InternalError,
}

impl CloseStatus {
    /// Numeric close code
    pub fn code(&self) -> u16 {
        match self {
            CloseStatus::Normal => 1000,
            CloseStatus::GoingAway => 1001,
            CloseStatus::ProtocolError => 1002,
            CloseStatus::UnsupportedData => 1003,
            CloseStatus::InvalidUtf8 => 1007,
            CloseStatus::PolicyViolation => 1008,
            CloseStatus::MessageTooBig => 1009,
            CloseStatus::InternalError => 1011,
        }
    }

    /// Map a numeric code back to a known status
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1000 => Some(CloseStatus::Normal),
            1001 => Some(CloseStatus::GoingAway),
            1002 => Some(CloseStatus::ProtocolError),
            1003 => Some(CloseStatus::UnsupportedData),
            1007 => Some(CloseStatus::InvalidUtf8),
            1008 => Some(CloseStatus::PolicyViolation),
            1009 => Some(CloseStatus::MessageTooBig),
            1011 => Some(CloseStatus::InternalError),
            _ => None,
        }
    }

    /// Default human-readable reason
    pub fn reason(&self) -> &'static str {
        match self {
            CloseStatus::Normal => "Normal",
            CloseStatus::GoingAway => "Going Away",
            CloseStatus::ProtocolError => "Protocol Error",
            CloseStatus::UnsupportedData => "Unsupported Data",
            CloseStatus::InvalidUtf8 => "Invalid UTF-8",
            CloseStatus::PolicyViolation => "Policy Violation",
            CloseStatus::MessageTooBig => "Message Too Big",
            CloseStatus::InternalError => "Internal Error",
        }
    }
}

impl fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason(), self.code())
    }
}

/// Build a close payload: the status code, followed by `reason` when it fits.
///
/// A reason longer than 123 bytes is dropped rather than truncated, so the
/// payload never exceeds the 125-byte control-frame limit and never splits a
/// UTF-8 sequence.
pub fn close_payload(status: CloseStatus, reason: &str) -> Bytes {
    let reason = if reason.len() <= MAX_CLOSE_REASON_SIZE {
        reason.as_bytes()
    } else {
        &[]
    };

    let mut payload = BytesMut::with_capacity(2 + reason.len());
    payload.put_u16(status.code());
    payload.put_slice(reason);
    payload.freeze()
}

/// Split a received close payload into its code and reason.
///
/// Returns `None` for an empty payload (no status given by the peer).
pub fn parse_close_payload(payload: &[u8]) -> Option<(u16, String)> {
    if payload.len() < 2 {
        return None;
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    Some((code, reason))
}
