//! rawsock Protocol - Wire format for raw-socket transports
//!
//! This crate provides the length-prefixed frame codec used on the wire
//! and the serializers that turn frame payloads into protocol messages.

pub mod frame;
pub mod serializer;

pub use frame::{Frame, FrameError, FrameKind, RawSocketCodec, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use serializer::{JsonSerializer, Serializer, SerializerError, SerializerKind};
