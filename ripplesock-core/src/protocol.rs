//! WebSocket protocol constants and opcode classification
//!
//! Opcodes, frame header bit masks and the handful of RFC 6455 constants the
//! codec, handshake and connection modules share.

use std::fmt;

/// WebSocket opcodes as defined in RFC 6455 Section 5.2
///
/// Every 4-bit value is representable so that a decoded frame can carry a
/// reserved opcode up to the connection, which answers it with a
/// policy-violation close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Reserved for future use
    Reserved3 = 0x3,
    /// Reserved for future use
    Reserved4 = 0x4,
    /// Reserved for future use
    Reserved5 = 0x5,
    /// Reserved for future use
    Reserved6 = 0x6,
    /// Reserved for future use
    Reserved7 = 0x7,
    /// Close frame
    Close = 0x8,
    /// Ping frame
    Ping = 0x9,
    /// Pong frame
    Pong = 0xA,
    /// Reserved for future use
    ReservedB = 0xB,
    /// Reserved for future use
    ReservedC = 0xC,
    /// Reserved for future use
    ReservedD = 0xD,
    /// Reserved for future use
    ReservedE = 0xE,
    /// Reserved for future use
    ReservedF = 0xF,
}

impl Opcode {
    /// Build an opcode from the low four bits of `value`
    pub fn from_bits(value: u8) -> Self {
        match value & frame::OPCODE_MASK {
            0x0 => Opcode::Continuation,
            0x1 => Opcode::Text,
            0x2 => Opcode::Binary,
            0x3 => Opcode::Reserved3,
            0x4 => Opcode::Reserved4,
            0x5 => Opcode::Reserved5,
            0x6 => Opcode::Reserved6,
            0x7 => Opcode::Reserved7,
            0x8 => Opcode::Close,
            0x9 => Opcode::Ping,
            0xA => Opcode::Pong,
            0xB => Opcode::ReservedB,
            0xC => Opcode::ReservedC,
            0xD => Opcode::ReservedD,
            0xE => Opcode::ReservedE,
            _ => Opcode::ReservedF,
        }
    }

    /// Get the numeric value of the opcode
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Check if this is a control opcode (Close, Ping, Pong)
    pub fn is_control(&self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Check if this is a data opcode
    pub fn is_data(&self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary | Opcode::Continuation)
    }

    /// Check if this is a reserved opcode
    pub fn is_reserved(&self) -> bool {
        !self.is_control() && !self.is_data()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Continuation => f.write_str("CONTINUATION"),
            Opcode::Text => f.write_str("TEXT"),
            Opcode::Binary => f.write_str("BINARY"),
            Opcode::Close => f.write_str("CLOSE"),
            Opcode::Ping => f.write_str("PING"),
            Opcode::Pong => f.write_str("PONG"),
            other => write!(f, "UNKNOWN(0x{:x})", other.value()),
        }
    }
}

/// WebSocket protocol constants
pub mod constants {
    use std::time::Duration;

    /// WebSocket protocol version
    pub const WEBSOCKET_VERSION: &str = "13";

    /// WebSocket magic string for accept calculation
    pub const WEBSOCKET_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

    /// Largest payload the codec handles (16-bit extended length)
    pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

    /// Largest payload a control frame may carry
    pub const MAX_CONTROL_PAYLOAD_LEN: usize = 125;

    /// Maximum close reason size, so that code + reason fits a control frame
    pub const MAX_CLOSE_REASON_SIZE: usize = 123;

    /// How long a locally initiated close waits for the peer's Close frame
    pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default handshake timeout
    pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Maximum request head size
    pub const MAX_HEADER_SIZE: usize = 8192; // 8KB
}

/// Frame header bit positions and masks
pub mod frame {
    /// FIN bit position
    pub const FIN_BIT: u8 = 0x80;

    /// RSV1, RSV2 and RSV3 bits
    pub const RSV_MASK: u8 = 0x70;

    /// Opcode mask
    pub const OPCODE_MASK: u8 = 0x0F;

    /// MASK bit position
    pub const MASK_BIT: u8 = 0x80;

    /// Payload length mask for 7-bit length
    pub const PAYLOAD_LEN_MASK: u8 = 0x7F;

    /// Extended payload length (16-bit) marker
    pub const PAYLOAD_LEN_16: u8 = 126;

    /// Extended payload length (64-bit) marker
    pub const PAYLOAD_LEN_64: u8 = 127;

    /// Masking key length
    pub const MASKING_KEY_LEN: usize = 4;
}

/// HTTP status codes used around the handshake
pub mod http_status {
    /// HTTP Switching Protocols status
    pub const SWITCHING_PROTOCOLS: u16 = 101;

    /// HTTP Bad Request status
    pub const BAD_REQUEST: u16 = 400;

    /// HTTP Internal Server Error status
    pub const INTERNAL_SERVER_ERROR: u16 = 500;

    /// Reason phrase for a status code
    pub fn reason_phrase(status: u16) -> &'static str {
        match status {
            SWITCHING_PROTOCOLS => "Switching Protocols",
            BAD_REQUEST => "Bad Request",
            INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => "",
        }
    }
}

/// HTTP header names (lowercase for consistency)
pub mod http_header {
    /// Connection header
    pub const CONNECTION: &str = "connection";

    /// Upgrade header
    pub const UPGRADE: &str = "upgrade";

    /// Sec-WebSocket-Key header
    pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";

    /// Sec-WebSocket-Version header
    pub const SEC_WEBSOCKET_VERSION: &str = "sec-websocket-version";

    /// Sec-WebSocket-Accept header
    pub const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(Opcode::from_bits(0x1), Opcode::Text);
        assert_eq!(Opcode::from_bits(0x8), Opcode::Close);
        assert_eq!(Opcode::from_bits(0x83), Opcode::Reserved3);
        assert_eq!(Opcode::Pong.value(), 0xA);
    }

    #[test]
    fn test_opcode_classification() {
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Close.is_control());
        assert!(!Opcode::Text.is_control());
        assert!(Opcode::Binary.is_data());
        assert!(Opcode::Continuation.is_data());
        assert!(Opcode::Reserved3.is_reserved());
        assert!(Opcode::ReservedF.is_reserved());
        assert!(!Opcode::Pong.is_reserved());
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(Opcode::Ping.to_string(), "PING");
        assert_eq!(Opcode::ReservedB.to_string(), "UNKNOWN(0xb)");
    }

    #[test]
    fn test_reason_phrase() {
        assert_eq!(http_status::reason_phrase(101), "Switching Protocols");
        assert_eq!(http_status::reason_phrase(400), "Bad Request");
    }
}
