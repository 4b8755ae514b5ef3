//! Protocol messages carried over a transport.

use crate::error::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// One decoded protocol message.
///
/// Messages are JSON arrays whose first element is the integer message
/// code, e.g. `[1, "realm1", {}]`. The transport layer only checks that
/// shape; what the code means is up to the router or client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Message(Value);

impl Message {
    /// Builds a message from a code and its arguments.
    pub fn new(code: u64, args: impl IntoIterator<Item = Value>) -> Self {
        let mut items = vec![Value::from(code)];
        items.extend(args);
        Self(Value::Array(items))
    }

    /// Validates a raw JSON value as a message.
    pub fn from_value(value: Value) -> DomainResult<Self> {
        let code = value
            .as_array()
            .and_then(|items| items.first())
            .and_then(Value::as_u64);

        match code {
            Some(_) => Ok(Self(value)),
            None => Err(DomainError::InvalidMessage {
                reason: "expected a JSON array starting with an integer code".to_string(),
            }),
        }
    }

    /// Returns the message code.
    pub fn code(&self) -> u64 {
        self.0
            .as_array()
            .and_then(|items| items.first())
            .and_then(Value::as_u64)
            .unwrap_or_default()
    }

    /// Returns the arguments following the code.
    pub fn args(&self) -> &[Value] {
        self.0
            .as_array()
            .and_then(|items| items.get(1..))
            .unwrap_or(&[])
    }

    /// Returns the full JSON payload.
    pub fn payload(&self) -> &Value {
        &self.0
    }

    pub fn into_payload(self) -> Value {
        self.0
    }
}

impl TryFrom<Value> for Message {
    type Error = DomainError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<Message> for Value {
    fn from(msg: Message) -> Self {
        msg.0
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
