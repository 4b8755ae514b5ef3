//! Error types for the transport providers.
//!
//! - `ProviderError`: failures of provider operations (bind, connect, registry)
//! - `TransportError`: failures decoding or writing frames on one connection
//! - `SessionError`: failures reported by a session collaborator
//! - `ShutdownReport`: outcome of draining sessions on router stop

use rawsock_core::ConnectionId;
use rawsock_protocol::{FrameError, SerializerError};
use thiserror::Error;

// ============================================================================
// Provider Errors
// ============================================================================

/// Errors that can occur in provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A close or lookup named a connection that is not in the registry.
    ///
    /// Recoverable: logged by the provider, never fatal.
    #[error("connection not registered: {0}")]
    ConnectionNotRegistered(ConnectionId),

    /// Internal bookkeeping is inconsistent, e.g. a connection id was
    /// accepted twice.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The client's single outbound connect did not succeed.
    #[error("failed to connect to {addr}: {error}")]
    ConnectFailed { addr: String, error: String },

    /// The router could not bind its listening socket.
    #[error("failed to bind {addr}: {error}")]
    Bind { addr: String, error: String },

    #[error("provider already started")]
    AlreadyStarted,

    /// A connection arrived after shutdown began.
    #[error("provider is shutting down")]
    ShuttingDown,

    /// The connection actor has stopped.
    #[error("provider channel closed")]
    ChannelClosed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Errors raised by a single connection's transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("serializer error: {0}")]
    Serializer(#[from] SerializerError),

    /// The outbound write path has shut down.
    #[error("transport closed")]
    Closed,
}

// ============================================================================
// Session Errors
// ============================================================================

/// Errors reported by a session collaborator.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session shutdown failed: {0}")]
    Shutdown(String),

    #[error("session transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of draining every registered session on router stop.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Number of sessions `shutdown()` was called on.
    pub attempted: usize,

    /// Sessions whose shutdown failed, in drain order.
    pub failures: Vec<(ConnectionId, SessionError)>,
}

impl ShutdownReport {
    /// Returns true if every session shut down cleanly.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.attempted.saturating_sub(self.failures.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::ConnectionNotRegistered(ConnectionId::new(4));
        assert_eq!(err.to_string(), "connection not registered: conn-4");

        let err = ProviderError::ConnectFailed {
            addr: "127.0.0.1:8181".to_string(),
            error: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:8181"));
        assert!(err.to_string().contains("connection refused"));

        let err = ProviderError::Bind {
            addr: "0.0.0.0:80".to_string(),
            error: "permission denied".to_string(),
        };
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:80: permission denied");
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: TransportError = SerializerError::Decode("bad json".to_string()).into();
        assert!(matches!(err, TransportError::Serializer(_)));

        let err: ProviderError = err.into();
        assert!(err.to_string().contains("bad json"));
    }

    #[test]
    fn test_shutdown_report_counts() {
        let mut report = ShutdownReport::default();
        assert!(report.is_clean());

        report.attempted = 3;
        report
            .failures
            .push((ConnectionId::new(2), SessionError::Shutdown("boom".to_string())));
        assert!(!report.is_clean());
        assert_eq!(report.succeeded(), 2);
    }
}
