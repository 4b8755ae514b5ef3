//! Connection actor - owns the registry and every router-side transport.
//!
//! The actor is the single owner of connection state on the router side.
//! It receives `ProviderCommand`s over an mpsc channel and processes them
//! one at a time, so the registry is never mutated concurrently and the
//! shutdown drain sees a consistent snapshot.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Registry errors are logged and never abort the actor
//! - Channel send failures are logged but don't panic

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rawsock_core::{ConnectionId, ConnectionInfo, PeerKind};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::commands::ProviderCommand;
use crate::config::ProviderConfig;
use crate::connector::RawConnection;
use crate::error::{ProviderError, ShutdownReport};
use crate::lifecycle::{EventDispatcher, LifecycleEvent};
use crate::peer::{Router, SessionRef};
use crate::registry::ConnectionRegistry;
use crate::transport::{spawn_writer, RawSocketTransport};

/// Read buffer reserved per read call.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Transport and reader control for one open connection.
struct LiveConnection {
    transport: RawSocketTransport,
    reader_cancel: CancellationToken,
}

/// The connection actor.
///
/// # Ownership
///
/// The actor owns:
/// - `registry`: connection → session, the source of truth for open connections
/// - `connections`: connection → transport and reader cancellation
///
/// Both maps always hold the same keys.
pub struct ConnectionActor {
    /// Command receiver
    receiver: mpsc::Receiver<ProviderCommand>,

    /// Weak sender cloned into reader tasks; weak so the actor does not keep
    /// its own channel open.
    commands: mpsc::WeakSender<ProviderCommand>,

    registry: ConnectionRegistry,

    connections: HashMap<ConnectionId, LiveConnection>,

    router: Arc<dyn Router>,

    dispatcher: Arc<dyn EventDispatcher>,

    config: ProviderConfig,

    /// Parent of every reader's cancellation token.
    shutdown: CancellationToken,

    /// Set once the stop drain has run; later accepts are rejected.
    stopping: bool,
}

impl ConnectionActor {
    /// Creates a new connection actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `commands` - Weak handle to the same channel, for reader tasks
    /// * `router` - Creates a session per accepted connection
    /// * `dispatcher` - Receives connection open/close events
    /// * `config` - Serializer, trust flag and frame limit for transports
    pub fn new(
        receiver: mpsc::Receiver<ProviderCommand>,
        commands: mpsc::WeakSender<ProviderCommand>,
        router: Arc<dyn Router>,
        dispatcher: Arc<dyn EventDispatcher>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            receiver,
            commands,
            registry: ConnectionRegistry::new(),
            connections: HashMap::new(),
            router,
            dispatcher,
            config,
            shutdown: CancellationToken::new(),
            stopping: false,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until every sender is gone: the provider, the
    /// accept loop and all reader tasks.
    pub async fn run(mut self) {
        debug!("Connection actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        debug!(
            open_connections = self.registry.len(),
            "Connection actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: ProviderCommand) {
        trace!(command = cmd.kind(), "Handling command");

        match cmd {
            ProviderCommand::Accept { connection, raw } => {
                if let Err(e) = self.on_accept(connection, raw) {
                    warn!(connection = %connection, error = %e, "Connection rejected");
                }
            }
            ProviderCommand::Data { connection, bytes } => {
                self.on_data(connection, &bytes);
            }
            ProviderCommand::Close { connection } => {
                if let Err(e) = self.on_close(connection) {
                    warn!(connection = %connection, error = %e, "Ignoring close");
                }
            }
            ProviderCommand::Stop { respond_to } => {
                let report = self.on_router_stop();
                // Ignore send error - provider may have dropped the receiver
                let _ = respond_to.send(report);
            }
            ProviderCommand::ConnectionCount { respond_to } => {
                let _ = respond_to.send(self.registry.len());
            }
            ProviderCommand::GetSession {
                connection,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.get(connection).cloned());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Binds an accepted connection to a new transport and session.
    ///
    /// Order matters: the transport is configured before the router sees
    /// it, the session is registered before `connection_open` fires, and
    /// the reader starts last so no bytes arrive for an unregistered
    /// connection.
    fn on_accept(
        &mut self,
        connection: ConnectionId,
        raw: RawConnection,
    ) -> Result<SessionRef, ProviderError> {
        if self.stopping {
            return Err(ProviderError::ShuttingDown);
        }

        if self.registry.contains(connection) {
            return Err(ProviderError::InvariantViolation(format!(
                "{connection} accepted twice"
            )));
        }

        let commands = self.commands.upgrade().ok_or(ProviderError::ChannelClosed)?;

        let info = ConnectionInfo::new(connection, raw.peer_addr, PeerKind::Router);
        debug!(connection = %connection, peer = info.peer_label(), "Raw socket opened");

        let (reader, writer) = tokio::io::split(raw.stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        spawn_writer(connection, writer, outbound_rx);

        let mut transport =
            RawSocketTransport::new(info, outbound_tx, self.config.max_frame_len);
        transport.set_serializer(self.config.serializer.build());
        transport.set_trusted(self.config.trusted);

        let session = self.router.create_new_session(transport.handle());
        self.registry.insert(connection, SessionRef::clone(&session))?;

        let target = SessionRef::clone(&session);
        transport.on_message(move |_, msg| target.dispatch_message(msg));

        let reader_cancel = self.shutdown.child_token();
        self.connections.insert(
            connection,
            LiveConnection {
                transport,
                reader_cancel: reader_cancel.clone(),
            },
        );

        info!(
            connection = %connection,
            total_connections = self.registry.len(),
            "Connection registered"
        );

        let event = LifecycleEvent::ConnectionOpen {
            connection,
            session: SessionRef::clone(&session),
        };
        self.dispatcher.dispatch(event.clone(), event.name());

        spawn_reader(connection, reader, commands, reader_cancel);

        Ok(session)
    }

    /// Feeds inbound bytes to the connection's transport.
    ///
    /// A framing error closes the connection; the reader then reports the
    /// close through the normal path.
    fn on_data(&mut self, connection: ConnectionId, bytes: &[u8]) {
        let Some(live) = self.connections.get_mut(&connection) else {
            debug!(connection = %connection, "Data for unknown connection");
            return;
        };

        if let Err(e) = live.transport.handle_data(bytes) {
            warn!(connection = %connection, error = %e, "Transport error, closing connection");
            live.transport.handle().close();
            live.reader_cancel.cancel();
        }
    }

    /// Unregisters a closed connection and announces it.
    ///
    /// # Errors
    ///
    /// `ProviderError::ConnectionNotRegistered` if the connection is unknown,
    /// which makes a repeated close harmless.
    fn on_close(&mut self, connection: ConnectionId) -> Result<SessionRef, ProviderError> {
        let session = self.registry.remove(connection)?;

        let open_ms = match self.connections.remove(&connection) {
            Some(live) => {
                live.reader_cancel.cancel();
                live.transport.handle().close();
                live.transport.info().age().as_millis() as u64
            }
            None => {
                warn!(connection = %connection, "Registered connection had no transport");
                0
            }
        };

        info!(
            connection = %connection,
            open_ms,
            total_connections = self.registry.len(),
            "Raw socket closed"
        );

        let event = LifecycleEvent::ConnectionClose {
            connection,
            session: SessionRef::clone(&session),
        };
        self.dispatcher.dispatch(event.clone(), event.name());

        Ok(session)
    }

    /// Shuts down every registered session, best effort.
    ///
    /// Iterates a snapshot of the registry; a failing `shutdown()` is
    /// recorded and the drain moves on. Afterwards all readers are
    /// cancelled, so every connection still open closes exactly once
    /// through `on_close`.
    fn on_router_stop(&mut self) -> ShutdownReport {
        self.stopping = true;

        let snapshot = self.registry.snapshot();
        let mut report = ShutdownReport::default();

        info!(sessions = snapshot.len(), "Shutting down sessions");

        for (connection, session) in snapshot {
            report.attempted += 1;
            if let Err(e) = session.shutdown() {
                warn!(connection = %connection, error = %e, "Session shutdown failed");
                report.failures.push((connection, e));
            }
        }

        self.shutdown.cancel();

        report
    }
}

/// Spawns the task that reads a connection and reports to the actor.
///
/// Sends `Data` for every read and exactly one `Close` when the stream
/// ends, fails, or `cancel` fires.
fn spawn_reader<R>(
    connection: ConnectionId,
    mut reader: R,
    commands: mpsc::Sender<ProviderCommand>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        loop {
            buf.reserve(READ_BUFFER_SIZE);

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(connection = %connection, "Reader cancelled");
                    break;
                }
                result = reader.read_buf(&mut buf) => result,
            };

            match result {
                Ok(0) => {
                    debug!(connection = %connection, "Peer closed connection");
                    break;
                }
                Ok(_) => {
                    let bytes: Bytes = buf.split().freeze();
                    if commands
                        .send(ProviderCommand::Data { connection, bytes })
                        .await
                        .is_err()
                    {
                        debug!(connection = %connection, "Actor gone, reader stopping");
                        return;
                    }
                }
                Err(e) => {
                    debug!(connection = %connection, error = %e, "Read failed");
                    break;
                }
            }
        }

        let _ = commands.send(ProviderCommand::Close { connection }).await;
    });
}
