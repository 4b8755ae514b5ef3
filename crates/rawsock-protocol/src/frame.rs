//! Length-prefixed frame codec.
//!
//! Every frame starts with a 4-byte header:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────┐
//! │ byte 0       │ bytes 1..4                   │
//! │ xxxxx kkk    │ payload length (u24, BE)     │
//! └──────────────┴──────────────────────────────┘
//! ```
//!
//! The low three bits of byte 0 carry the [`FrameKind`]; the upper bits are
//! reserved and must be zero. The payload follows the header directly.
//!
//! **Panic-Free Policy:** no `.unwrap()`, `.expect()` or direct indexing.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest payload a 24-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = 0x00FF_FFFF;

const KIND_MASK: u8 = 0x07;

// ============================================================================
// Frame Types
// ============================================================================

/// Kind of a frame, from the low bits of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Serialized protocol message.
    Message = 0,
    /// Keepalive request; the receiver echoes the payload in a pong.
    Ping = 1,
    /// Keepalive response.
    Pong = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value & !KIND_MASK != 0 {
            return Err(FrameError::ReservedBits(value));
        }
        match value {
            0 => Ok(Self::Message),
            1 => Ok(Self::Ping),
            2 => Ok(Self::Pong),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn message(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Message,
            payload: payload.into(),
        }
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Ping,
            payload: payload.into(),
        }
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Pong,
            payload: payload.into(),
        }
    }
}

/// Errors raised while encoding or decoding frames.
///
/// Any decode error leaves the stream unsynchronised, so callers should
/// treat it as fatal for the connection.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown frame kind: {0}")]
    UnknownKind(u8),

    #[error("reserved header bits set: {0:#04x}")]
    ReservedBits(u8),

    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ============================================================================
// Codec
// ============================================================================

/// Codec for raw-socket frames, usable standalone or with
/// `tokio_util::codec::Framed`.
#[derive(Debug, Clone, Copy)]
pub struct RawSocketCodec {
    max_payload_len: usize,
}

impl RawSocketCodec {
    /// Creates a codec that accepts payloads up to `max_payload_len` bytes.
    ///
    /// The limit is clamped to [`MAX_PAYLOAD_LEN`].
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            max_payload_len: max_payload_len.min(MAX_PAYLOAD_LEN),
        }
    }

    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }
}

impl Default for RawSocketCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_LEN)
    }
}

impl Decoder for RawSocketCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let header = match src.get(..HEADER_LEN).map(<[u8; HEADER_LEN]>::try_from) {
            Some(Ok(header)) => header,
            _ => return Ok(None),
        };
        let [kind, len_hi, len_mid, len_lo] = header;

        let kind = FrameKind::try_from(kind)?;
        let len = u32::from_be_bytes([0, len_hi, len_mid, len_lo]) as usize;

        if len > self.max_payload_len {
            return Err(FrameError::TooLarge {
                size: len,
                max: self.max_payload_len,
            });
        }

        let total = HEADER_LEN + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();

        Ok(Some(Frame { kind, payload }))
    }
}

impl Encoder<Frame> for RawSocketCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let len = frame.payload.len();
        if len > self.max_payload_len {
            return Err(FrameError::TooLarge {
                size: len,
                max: self.max_payload_len,
            });
        }

        dst.reserve(HEADER_LEN + len);
        dst.put_u8(frame.kind as u8);
        dst.put_uint(len as u64, 3);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        RawSocketCodec::default().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_header_layout() {
        let buf = encode(Frame::message(&b"[1]"[..]));
        assert_eq!(&buf[..], &[0x00, 0x00, 0x00, 0x03, b'[', b'1', b']']);

        let buf = encode(Frame::ping(&b"hi"[..]));
        assert_eq!(&buf[..4], &[0x01, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_decode_partial_header_waits() {
        let mut codec = RawSocketCodec::default();
        let mut buf = BytesMut::from(&[0x00, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_partial_payload_waits() {
        let mut codec = RawSocketCodec::default();
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x00, 0x05, b'a', b'b'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"cde");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.kind, FrameKind::Message);
        assert_eq!(&frame.payload[..], b"abcde");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_multiple_frames_in_one_buffer() {
        let mut buf = encode(Frame::message(&b"one"[..]));
        buf.extend_from_slice(&encode(Frame::pong(&b"two"[..])));

        let mut codec = RawSocketCodec::default();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first.payload[..], b"one");
        assert_eq!(second.kind, FrameKind::Pong);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_unknown_kind() {
        let mut codec = RawSocketCodec::default();
        let mut buf = BytesMut::from(&[0x05, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::UnknownKind(5))
        ));
    }

    #[test]
    fn test_decode_reserved_bits() {
        let mut codec = RawSocketCodec::default();
        let mut buf = BytesMut::from(&[0x80, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::ReservedBits(0x80))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut codec = RawSocketCodec::new(16);
        let mut buf = BytesMut::from(&[0x00, 0x00, 0x00, 0x20][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let mut codec = RawSocketCodec::new(2);
        let mut buf = BytesMut::new();
        let result = codec.encode(Frame::message(&b"abc"[..]), &mut buf);
        assert!(matches!(result, Err(FrameError::TooLarge { size: 3, max: 2 })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(RawSocketCodec::new(usize::MAX).max_payload_len(), MAX_PAYLOAD_LEN);
    }
}
