//! Message serializers.
//!
//! A transport hands frame payloads to its serializer and gets protocol
//! messages back. Only JSON is implemented; the trait keeps the seam open.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use rawsock_core::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while converting between payloads and messages.
#[derive(Debug, Clone, Error)]
pub enum SerializerError {
    #[error("failed to encode message: {0}")]
    Encode(String),

    #[error("failed to decode message: {0}")]
    Decode(String),
}

/// Converts protocol messages to and from frame payloads.
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    fn serialize(&self, msg: &Message) -> Result<Bytes, SerializerError>;

    fn deserialize(&self, payload: &[u8]) -> Result<Message, SerializerError>;
}

/// UTF-8 JSON serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, msg: &Message) -> Result<Bytes, SerializerError> {
        serde_json::to_vec(msg)
            .map(Bytes::from)
            .map_err(|e| SerializerError::Encode(e.to_string()))
    }

    fn deserialize(&self, payload: &[u8]) -> Result<Message, SerializerError> {
        serde_json::from_slice(payload).map_err(|e| SerializerError::Decode(e.to_string()))
    }
}

/// Serializer selection as it appears in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    #[default]
    Json,
}

impl SerializerKind {
    /// Instantiates the selected serializer.
    pub fn build(self) -> Arc<dyn Serializer> {
        match self {
            Self::Json => Arc::new(JsonSerializer),
        }
    }
}
