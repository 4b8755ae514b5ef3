//! Live mapping from connection to session (router side).
//!
//! Owned by the connection actor and mutated only from its task, so it
//! needs no locking. An entry exists iff the connection is open and has
//! been accepted.

use std::collections::HashMap;

use rawsock_core::ConnectionId;

use crate::error::ProviderError;
use crate::peer::SessionRef;

/// Registry of open connections and their sessions.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: HashMap<ConnectionId, SessionRef>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the session for a newly accepted connection.
    ///
    /// # Errors
    ///
    /// `ProviderError::InvariantViolation` if the connection is already
    /// registered; the existing entry is left untouched.
    pub fn insert(&mut self, connection: ConnectionId, session: SessionRef) -> Result<(), ProviderError> {
        if self.sessions.contains_key(&connection) {
            return Err(ProviderError::InvariantViolation(format!(
                "{connection} registered twice"
            )));
        }
        self.sessions.insert(connection, session);
        Ok(())
    }

    /// Removes and returns the session of a closing connection.
    ///
    /// # Errors
    ///
    /// `ProviderError::ConnectionNotRegistered` if there is no entry, e.g.
    /// on a second close of the same connection.
    pub fn remove(&mut self, connection: ConnectionId) -> Result<SessionRef, ProviderError> {
        self.sessions
            .remove(&connection)
            .ok_or(ProviderError::ConnectionNotRegistered(connection))
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&SessionRef> {
        self.sessions.get(&connection)
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.sessions.contains_key(&connection)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Copies out every entry, ordered by connection id.
    ///
    /// Later mutation of the registry does not affect the snapshot.
    pub fn snapshot(&self) -> Vec<(ConnectionId, SessionRef)> {
        let mut entries: Vec<_> = self
            .sessions
            .iter()
            .map(|(id, session)| (*id, SessionRef::clone(session)))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}
