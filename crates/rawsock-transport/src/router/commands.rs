//! Commands delivered to the connection actor.
//!
//! Every socket event on the router side becomes one `ProviderCommand`:
//! the accept loop sends `Accept`, per-connection reader tasks send `Data`
//! and `Close`, and the provider sends `Stop` and queries. Routing them all
//! through one channel keeps the actor the single writer of the registry.

use bytes::Bytes;
use rawsock_core::ConnectionId;
use tokio::sync::oneshot;

use crate::connector::RawConnection;
use crate::error::ShutdownReport;
use crate::peer::SessionRef;

/// Commands sent to the connection actor.
pub enum ProviderCommand {
    /// A connection was accepted by the listener.
    Accept {
        connection: ConnectionId,
        raw: RawConnection,
    },

    /// Raw bytes arrived on a connection, in arrival order.
    Data {
        connection: ConnectionId,
        bytes: Bytes,
    },

    /// A connection's read side ended (EOF, read error or cancellation).
    Close { connection: ConnectionId },

    /// Drain all sessions; the listener is already closed.
    Stop {
        respond_to: oneshot::Sender<ShutdownReport>,
    },

    /// Number of registered connections.
    ConnectionCount { respond_to: oneshot::Sender<usize> },

    /// Session bound to an open connection, if any.
    GetSession {
        connection: ConnectionId,
        respond_to: oneshot::Sender<Option<SessionRef>>,
    },
}

impl ProviderCommand {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::Data { .. } => "data",
            Self::Close { .. } => "close",
            Self::Stop { .. } => "stop",
            Self::ConnectionCount { .. } => "connection_count",
            Self::GetSession { .. } => "get_session",
        }
    }
}
