//! WebSocket frame model, decoder and encoder
//!
//! [`FrameReader`] pulls exactly one frame per call off an async byte stream,
//! enforcing the RFC 6455 subset RippleSock supports: no fragmentation, no
//! extensions, no 64-bit lengths. [`Frame::encode`] produces server frames,
//! which are never masked; [`Frame::encode_masked`] produces the client form.

use crate::{
    error::{FrameError, Result},
    protocol::{constants::*, frame::*, Opcode},
};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// A single WebSocket frame
///
/// Frames are plain values: the payload is an immutable [`Bytes`], so a
/// clone never shares a mutable buffer with the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message
    pub fin: bool,
    /// Frame opcode
    pub opcode: Opcode,
    /// Whether the frame arrived masked
    pub masked: bool,
    /// Masking key the frame arrived with
    pub mask: Option<[u8; 4]>,
    /// Payload data, already unmasked
    pub payload: Bytes,
}

impl Frame {
    /// Create a new final, unmasked frame
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            opcode,
            masked: false,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Create a text frame
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// Create a binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Create a ping frame
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Create a pong frame
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Create a close frame carrying `status` and, if it fits, `reason`
    pub fn close(status: crate::close::CloseStatus, reason: &str) -> Self {
        Self::new(Opcode::Close, crate::close::close_payload(status, reason))
    }

    /// Get the payload length
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check if this is a control frame
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Check if this is a data frame
    pub fn is_data(&self) -> bool {
        self.opcode.is_data()
    }

    /// Check if this is the final frame
    pub fn is_final(&self) -> bool {
        self.fin
    }

    /// Serialize as a server frame: FIN set, never masked.
    ///
    /// The `masked` and `mask` fields are ignored.
    pub fn encode(&self) -> std::result::Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(4 + self.payload.len());
        self.write_header(&mut buf, 0)?;
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Serialize as a client frame masked with `key`
    pub fn encode_masked(&self, key: [u8; 4]) -> std::result::Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(8 + self.payload.len());
        self.write_header(&mut buf, MASK_BIT)?;
        buf.put_slice(&key);
        let start = buf.len();
        buf.put_slice(&self.payload);
        apply_mask(&mut buf[start..], key);
        Ok(buf.freeze())
    }

    fn write_header(&self, buf: &mut BytesMut, mask_bit: u8) -> std::result::Result<(), FrameError> {
        let payload_len = self.payload.len();

        if self.opcode.is_control() && payload_len > MAX_CONTROL_PAYLOAD_LEN {
            return Err(FrameError::Protocol("control frame payload exceeds 125 bytes"));
        }
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge);
        }

        buf.put_u8(FIN_BIT | self.opcode.value());
        if payload_len < PAYLOAD_LEN_16 as usize {
            buf.put_u8(mask_bit | payload_len as u8);
        } else {
            buf.put_u8(mask_bit | PAYLOAD_LEN_16);
            buf.put_u16(payload_len as u16);
        }
        Ok(())
    }
}

/// XOR `data` in place with the 4-byte masking key.
///
/// Applying the same key twice restores the original bytes.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % MASKING_KEY_LEN];
    }
}

/// Generate a random masking key for client frames
pub fn random_mask_key() -> [u8; 4] {
    rand::random()
}

/// Which side of the connection the decoder sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Decoding client→server traffic; frames must be masked
    Server,
    /// Decoding server→client traffic; frames must not be masked
    Client,
}

/// Decodes frames from an async byte stream, one frame per call
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    role: Role,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a reader for client→server traffic
    pub fn new(inner: R) -> Self {
        Self::with_role(inner, Role::Server)
    }

    /// Create a reader for the given side of the connection
    pub fn with_role(inner: R, role: Role) -> Self {
        Self { inner, role }
    }

    /// Read and validate the next frame.
    ///
    /// Each step is a fixed-size read; a short read fails the whole frame and
    /// nothing is kept for the next call.
    pub async fn read_frame(&mut self) -> std::result::Result<Frame, FrameError> {
        let mut header = [0u8; 2];
        self.inner.read_exact(&mut header).await?;

        if header[0] & FIN_BIT == 0 {
            return Err(FrameError::UnsupportedFragmentation);
        }
        if header[0] & RSV_MASK != 0 {
            return Err(FrameError::ExtensionNotSupported);
        }
        let opcode = Opcode::from_bits(header[0]);

        let masked = header[1] & MASK_BIT != 0;
        match (self.role, masked) {
            (Role::Server, false) => return Err(FrameError::Protocol("client frame is not masked")),
            (Role::Client, true) => return Err(FrameError::Protocol("server frame is masked")),
            _ => {}
        }

        let payload_len = match header[1] & PAYLOAD_LEN_MASK {
            PAYLOAD_LEN_64 => return Err(FrameError::PayloadTooLarge),
            PAYLOAD_LEN_16 => {
                if opcode.is_control() {
                    return Err(FrameError::Protocol("control frame uses extended length"));
                }
                let mut ext = [0u8; 2];
                self.inner.read_exact(&mut ext).await?;
                let len = u16::from_be_bytes(ext);
                if len < PAYLOAD_LEN_16 as u16 {
                    return Err(FrameError::Protocol("non-minimal payload length"));
                }
                len as usize
            }
            len => len as usize,
        };

        let mask = if masked {
            let mut key = [0u8; MASKING_KEY_LEN];
            self.inner.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        let mut payload = BytesMut::zeroed(payload_len);
        self.inner.read_exact(&mut payload).await?;
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Frame {
            fin: true,
            opcode,
            masked,
            mask,
            payload: payload.freeze(),
        })
    }
}

/// Writes encoded server frames to an async byte stream
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    /// Wrap a stream
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Encode `frame`, write it and flush
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        self.inner.write_all(&bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Write an already-encoded frame and flush
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Shut down the write side of the stream
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close::CloseStatus;
    use proptest::prelude::*;

    const KEY: [u8; 4] = [0x01, 0x02, 0x03, 0x04];

    async fn decode(bytes: &[u8]) -> std::result::Result<Frame, FrameError> {
        FrameReader::new(bytes).read_frame().await
    }

    #[test]
    fn test_text_frame_serialization() {
        let bytes = Frame::text("hello").encode().unwrap();

        assert_eq!(bytes[0], 0x81); // FIN=1, RSV=000, Opcode=0001
        assert_eq!(bytes[1], 0x05); // MASK=0, Length=5
        assert_eq!(&bytes[2..], b"hello");
    }

    #[test]
    fn test_masked_client_text_frame() {
        let bytes = Frame::text("hi").encode_masked(KEY).unwrap();
        assert_eq!(&bytes[..], &[0x81, 0x82, 0x01, 0x02, 0x03, 0x04, 0x69, 0x6B]);
    }

    #[test]
    fn test_encode_ignores_mask_fields() {
        let mut frame = Frame::binary(vec![1u8, 2, 3]);
        frame.masked = true;
        frame.mask = Some(KEY);

        let bytes = frame.encode().unwrap();
        assert_eq!(&bytes[..], &[0x82, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_extended_length_encoding() {
        let bytes = Frame::binary(vec![0u8; 300]).encode().unwrap();

        assert_eq!(bytes[1], 126);
        assert_eq!(&bytes[2..4], &300u16.to_be_bytes());
        assert_eq!(bytes.len(), 4 + 300);

        let bytes = Frame::binary(vec![0u8; 125]).encode().unwrap();
        assert_eq!(bytes[1], 125);
    }

    #[test]
    fn test_encode_rejects_oversized_payloads() {
        let frame = Frame::binary(vec![0u8; MAX_PAYLOAD_LEN + 1]);
        assert!(matches!(frame.encode(), Err(FrameError::PayloadTooLarge)));

        let frame = Frame::ping(vec![0u8; 126]);
        assert!(matches!(frame.encode(), Err(FrameError::Protocol(_))));
    }

    #[test]
    fn test_close_frame() {
        let bytes = Frame::close(CloseStatus::Normal, "Goodbye").encode().unwrap();

        assert_eq!(bytes[0], 0x88); // FIN=1, Opcode=8
        assert_eq!(bytes[1], 0x09); // 2 bytes code + 7 bytes reason
        assert_eq!(&bytes[2..4], &1000u16.to_be_bytes());
        assert_eq!(&bytes[4..], b"Goodbye");
    }

    #[tokio::test]
    async fn test_decode_masked_frame() {
        let frame = decode(&[0x81, 0x82, 0x01, 0x02, 0x03, 0x04, 0x69, 0x6B]).await.unwrap();

        assert!(frame.fin);
        assert!(frame.masked);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.mask, Some(KEY));
        assert_eq!(frame.payload_len(), 2);
        assert_eq!(&frame.payload[..], b"hi");
    }

    #[tokio::test]
    async fn test_decode_extended_length() {
        let payload = vec![7u8; 200];
        let bytes = Frame::binary(payload.clone()).encode_masked(KEY).unwrap();

        let frame = decode(&bytes).await.unwrap();
        assert_eq!(frame.payload_len(), 200);
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[tokio::test]
    async fn test_decode_rejects_reserved_bits() {
        for rsv in [0x40u8, 0x20, 0x10] {
            let bytes = [0x81 | rsv, 0x80, 0, 0, 0, 0];
            assert!(matches!(decode(&bytes).await, Err(FrameError::ExtensionNotSupported)));
        }
    }

    #[tokio::test]
    async fn test_decode_rejects_fragments() {
        let bytes = [0x01, 0x80, 0, 0, 0, 0];
        assert!(matches!(decode(&bytes).await, Err(FrameError::UnsupportedFragmentation)));
    }

    #[tokio::test]
    async fn test_decode_rejects_unmasked_client_frame() {
        let bytes = Frame::text("hi").encode().unwrap();
        assert!(matches!(decode(&bytes).await, Err(FrameError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_client_role_rejects_masked_frame() {
        let bytes = Frame::text("hi").encode_masked(KEY).unwrap();
        let mut reader = FrameReader::with_role(&bytes[..], Role::Client);
        assert!(matches!(reader.read_frame().await, Err(FrameError::Protocol(_))));

        let bytes = Frame::text("hi").encode().unwrap();
        let mut reader = FrameReader::with_role(&bytes[..], Role::Client);
        assert_eq!(&reader.read_frame().await.unwrap().payload[..], b"hi");
    }

    #[tokio::test]
    async fn test_decode_rejects_64_bit_length() {
        let bytes = [0x82, 0xFF, 0, 0, 0, 0, 0, 0, 0, 200];
        assert!(matches!(decode(&bytes).await, Err(FrameError::PayloadTooLarge)));
    }

    #[tokio::test]
    async fn test_decode_rejects_non_minimal_length() {
        let bytes = [0x82, 0xFE, 0x00, 0x7D, 1, 2, 3, 4];
        assert!(matches!(decode(&bytes).await, Err(FrameError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_decode_rejects_extended_control_frame() {
        let bytes = [0x89, 0xFE, 0x00, 0x80, 1, 2, 3, 4];
        assert!(matches!(decode(&bytes).await, Err(FrameError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_decode_keeps_reserved_opcode() {
        let frame = decode(&[0x83, 0x80, 1, 2, 3, 4]).await.unwrap();
        assert_eq!(frame.opcode, Opcode::Reserved3);
        assert!(frame.payload.is_empty());
    }

    #[tokio::test]
    async fn test_short_read_fails_frame() {
        let bytes = Frame::text("hello").encode_masked(KEY).unwrap();
        let err = decode(&bytes[..bytes.len() - 1]).await.unwrap_err();

        match err {
            FrameError::Read(io) => assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_decode_from_split_reads() {
        let bytes = Frame::text("split").encode_masked(KEY).unwrap();
        let stream = tokio_test::io::Builder::new()
            .read(&bytes[..1])
            .read(&bytes[1..5])
            .read(&bytes[5..])
            .build();

        let frame = FrameReader::new(stream).read_frame().await.unwrap();
        assert_eq!(&frame.payload[..], b"split");
    }

    #[tokio::test]
    async fn test_reads_consecutive_frames() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&Frame::ping("a").encode_masked(KEY).unwrap());
        wire.extend_from_slice(&Frame::text("b").encode_masked([9, 9, 9, 9]).unwrap());

        let mut reader = FrameReader::new(&wire[..]);
        assert_eq!(reader.read_frame().await.unwrap().opcode, Opcode::Ping);
        assert_eq!(&reader.read_frame().await.unwrap().payload[..], b"b");
    }

    #[tokio::test]
    async fn test_frame_writer_flushes_encoded_frame() {
        let expected = Frame::pong("x").encode().unwrap();
        let stream = tokio_test::io::Builder::new().write(&expected).build();

        let mut writer = FrameWriter::new(stream);
        writer.write_frame(&Frame::pong("x")).await.unwrap();
    }

    proptest! {
        #[test]
        fn prop_mask_is_involutive(payload in proptest::collection::vec(any::<u8>(), 0..512), key in any::<[u8; 4]>()) {
            let mut data = payload.clone();
            apply_mask(&mut data, key);
            apply_mask(&mut data, key);
            prop_assert_eq!(data, payload);
        }

        #[test]
        fn prop_masked_encoding_decodes(payload in proptest::collection::vec(any::<u8>(), 0..1024), key in any::<[u8; 4]>(), binary in any::<bool>()) {
            let frame = if binary { Frame::binary(payload.clone()) } else { Frame::text(payload.clone()) };
            let bytes = frame.encode_masked(key).unwrap();

            let decoded = tokio_test::block_on(decode(&bytes)).unwrap();
            prop_assert_eq!(decoded.opcode, frame.opcode);
            prop_assert_eq!(&decoded.payload[..], &payload[..]);
        }

        #[test]
        fn prop_server_encoding_decodes(payload in proptest::collection::vec(any::<u8>(), 0..1024)) {
            let bytes = Frame::binary(payload.clone()).encode().unwrap();

            let mut reader = FrameReader::with_role(&bytes[..], Role::Client);
            let decoded = tokio_test::block_on(reader.read_frame()).unwrap();
            prop_assert_eq!(decoded.opcode, Opcode::Binary);
            prop_assert_eq!(&decoded.payload[..], &payload[..]);
        }
    }
}
