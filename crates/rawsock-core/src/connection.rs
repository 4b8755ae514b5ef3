//! Connection identities and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Stable identity of one open connection.
///
/// Allocated by the accepting provider from a monotonic counter and never
/// reused within that provider, so a stale id can never alias a newer
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw counter value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Which side of the protocol a transport serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    /// Transport accepted by a router; messages go to a session.
    Router,
    /// Transport dialled by a client; messages go to the client peer.
    Client,
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Router => write!(f, "router"),
            Self::Client => write!(f, "client"),
        }
    }
}

// ============================================================================
// Connection Metadata
// ============================================================================

/// Metadata captured when a connection opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub id: ConnectionId,

    /// Remote address as reported by the socket, if known.
    pub peer_addr: Option<String>,

    pub peer_kind: PeerKind,

    pub opened_at: DateTime<Utc>,
}

impl ConnectionInfo {
    /// Creates connection metadata stamped with the current time.
    pub fn new(id: ConnectionId, peer_addr: Option<String>, peer_kind: PeerKind) -> Self {
        Self {
            id,
            peer_addr,
            peer_kind,
            opened_at: Utc::now(),
        }
    }

    /// Returns the peer address or a placeholder for display.
    pub fn peer_label(&self) -> &str {
        self.peer_addr.as_deref().unwrap_or("unknown")
    }

    /// Time the connection has been open so far.
    pub fn age(&self) -> std::time::Duration {
        self.open_duration(Utc::now())
    }

    /// Time elapsed between opening and `now`.
    ///
    /// Measured against `now`; a clock that stepped backwards yields zero.
    pub fn open_duration(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.opened_at).to_std().unwrap_or_default()
    }
}
