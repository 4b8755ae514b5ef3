//! rawsock Transport - Connection lifecycle for raw-socket peers
//!
//! This crate binds raw TCP connections to protocol sessions:
//! - `router` - Listening provider: accept loop, session registry, drain on stop
//! - `client` - Dialling provider: one outbound connection wired to a client peer
//! - `transport` - Framing adapter between socket bytes and protocol messages
//! - `lifecycle` - Router start/stop signals and connection open/close events
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 RouterTransportProvider                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │   accept loop   │────▶│     ConnectionActor         │   │
//! │  │  (TcpListener)  │     │  (registry + transports)    │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │           ▲                             │                   │
//! │           │ Data / Close                │ connection_open   │
//! │  ┌─────────────────┐                    ▼ connection_close  │
//! │  │  reader tasks   │     ┌─────────────────────────────┐   │
//! │  │ (per connection)│     │      EventDispatcher        │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod lifecycle;
pub mod peer;
pub mod registry;
pub mod router;
pub mod transport;

pub use client::{ClientConnection, ClientDriver, ClientTransportProvider};
pub use config::{ConfigError, ProviderConfig, DEFAULT_ADDRESS, DEFAULT_PORT};
pub use connector::{AsyncStream, BoxedStream, Connector, RawConnection, TcpConnector};
pub use error::{ProviderError, SessionError, ShutdownReport, TransportError};
pub use lifecycle::{
    BroadcastDispatcher, EventDispatcher, LifecycleBus, LifecycleEvent, LifecycleSignal,
    LifecycleSubscriber, CONNECTION_CLOSE, CONNECTION_OPEN, PROVIDER_PRIORITY,
};
pub use peer::{Client, Router, Session, SessionRef};
pub use registry::ConnectionRegistry;
pub use router::RouterTransportProvider;
pub use transport::{RawSocketTransport, TransportHandle};
