//! Collaborator interfaces the providers drive.
//!
//! The providers never interpret protocol messages themselves. Decoded
//! messages go to a [`Session`] (router side) or a [`Client`] (client side),
//! and sessions are created by a [`Router`].

use std::sync::Arc;

use rawsock_core::Message;

use crate::error::SessionError;
use crate::transport::TransportHandle;

/// Protocol-level peer bound 1:1 to an accepted connection.
pub trait Session: Send + Sync {
    /// Handles one decoded inbound message.
    fn dispatch_message(&self, msg: Message);

    /// Tears the session down during router stop.
    fn shutdown(&self) -> Result<(), SessionError>;
}

/// Shared session reference.
///
/// Lifecycle events carry the same `Arc` the router returned on accept, so
/// listeners can compare instances with `Arc::ptr_eq`.
pub type SessionRef = Arc<dyn Session>;

/// Router collaborator: creates a session for every accepted connection.
pub trait Router: Send + Sync {
    fn create_new_session(&self, transport: TransportHandle) -> SessionRef;
}

/// Client collaborator: receives the lifecycle of its single connection.
///
/// `on_open` is called once before any `on_message`; `on_close` is called
/// once after the connection's close signal.
pub trait Client: Send + Sync {
    fn on_open(&self, transport: &TransportHandle);

    fn on_message(&self, transport: &TransportHandle, msg: Message);

    fn on_close(&self, transport: &TransportHandle);
}
