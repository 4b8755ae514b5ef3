//! rawsock Core - Shared types for the raw-socket transport providers
//!
//! This crate provides the domain types shared between the frame
//! protocol (rawsock-protocol) and the transport providers
//! (rawsock-transport).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod connection;
pub mod error;
pub mod message;

// Re-exports for convenience
pub use connection::{ConnectionId, ConnectionInfo, PeerKind};
pub use error::{DomainError, DomainResult};
pub use message::Message;
