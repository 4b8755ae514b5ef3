//! Router-side raw-socket transport provider.
//!
//! The provider:
//! - Binds a TCP listener on `router.start`
//! - Hands every accepted connection to the connection actor
//! - Closes the listener and drains every session on `router.stop`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────┐
//! │ RouterTransportProvider │
//! │      (state: Idle →     │
//! │   Listening → Stopped)  │
//! └───────────┬─────────────┘
//!             │ spawns
//!     ┌───────┴────────┐
//!     ▼                ▼
//! ┌─────────────┐  ┌─────────────────┐
//! │ accept loop │─▶│ ConnectionActor │◀── reader tasks (Data / Close)
//! │ TcpListener │  │   registry      │
//! └─────────────┘  └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and allow continued operation

mod actor;
mod commands;

pub use actor::ConnectionActor;
pub use commands::ProviderCommand;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rawsock_core::ConnectionId;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::config::ProviderConfig;
use crate::connector::RawConnection;
use crate::error::{ProviderError, ShutdownReport};
use crate::lifecycle::{EventDispatcher, LifecycleSignal, LifecycleSubscriber, PROVIDER_PRIORITY};
use crate::peer::{Router, SessionRef};

/// Command channel buffer size
const COMMAND_BUFFER: usize = 256;

/// Running listener and the tasks serving it.
struct Listening {
    local_addr: SocketAddr,
    commands: mpsc::Sender<ProviderCommand>,
    accept_cancel: CancellationToken,
    accept_task: JoinHandle<()>,
    /// Stops the accept loop if the provider is dropped without `stop`.
    _accept_guard: DropGuard,
}

enum ProviderState {
    Idle,
    Listening(Listening),
    Stopped,
}

/// Raw-socket transport provider for a router.
///
/// Many concurrent inbound connections, each bound to its own session
/// from the [`Router`] collaborator.
pub struct RouterTransportProvider {
    config: ProviderConfig,
    router: Arc<dyn Router>,
    dispatcher: Arc<dyn EventDispatcher>,
    state: Mutex<ProviderState>,
}

impl RouterTransportProvider {
    /// Creates a provider that has not bound anything yet.
    ///
    /// # Arguments
    ///
    /// * `config` - Address, port, trust flag and framing options
    /// * `router` - Creates a session for every accepted connection
    /// * `dispatcher` - Receives `connection_open` / `connection_close`
    pub fn new(
        config: ProviderConfig,
        router: Arc<dyn Router>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        Self {
            config,
            router,
            dispatcher,
            state: Mutex::new(ProviderState::Idle),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Binds the listening socket and starts accepting on `handle`.
    ///
    /// The listener is bound before this returns, so no accept can happen
    /// earlier. Returns the bound address (useful with port 0).
    ///
    /// # Errors
    ///
    /// - `ProviderError::Bind` if the address cannot be bound
    /// - `ProviderError::AlreadyStarted` if called a second time
    pub async fn start(&self, handle: &Handle) -> Result<SocketAddr, ProviderError> {
        let mut state = self.state.lock().await;
        if !matches!(*state, ProviderState::Idle) {
            return Err(ProviderError::AlreadyStarted);
        }

        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            error!(address = %addr, error = %e, "Raw socket bind failed");
            ProviderError::Bind {
                addr: addr.clone(),
                error: e.to_string(),
            }
        })?;

        let local_addr = listener.local_addr().map_err(|e| ProviderError::Bind {
            addr: addr.clone(),
            error: e.to_string(),
        })?;

        info!(address = %local_addr, "Raw socket listening");

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = ConnectionActor::new(
            cmd_rx,
            cmd_tx.downgrade(),
            Arc::clone(&self.router),
            Arc::clone(&self.dispatcher),
            self.config.clone(),
        );
        handle.spawn(actor.run());

        let accept_cancel = CancellationToken::new();
        let accept_task = handle.spawn(accept_loop(
            listener,
            cmd_tx.clone(),
            accept_cancel.clone(),
        ));

        *state = ProviderState::Listening(Listening {
            local_addr,
            commands: cmd_tx,
            accept_cancel: accept_cancel.clone(),
            accept_task,
            _accept_guard: accept_cancel.drop_guard(),
        });

        Ok(local_addr)
    }

    /// Closes the listener, then drains every registered session.
    ///
    /// A no-op returning an empty report when the provider never started or
    /// has already stopped. Session shutdown failures are collected in the
    /// report, not returned as errors.
    ///
    /// # Errors
    ///
    /// `ProviderError::ChannelClosed` if the connection actor is gone.
    pub async fn stop(&self) -> Result<ShutdownReport, ProviderError> {
        let mut state = self.state.lock().await;

        let listening = match std::mem::replace(&mut *state, ProviderState::Stopped) {
            ProviderState::Listening(listening) => listening,
            other => {
                *state = other;
                debug!("Stop requested with no listener; nothing to do");
                return Ok(ShutdownReport::default());
            }
        };

        // Close the listener first so nothing new is accepted during the drain.
        listening.accept_cancel.cancel();
        if let Err(e) = listening.accept_task.await {
            warn!(error = %e, "Accept loop ended abnormally");
        }
        info!(address = %listening.local_addr, "Raw socket listener closed");

        let (tx, rx) = oneshot::channel();
        listening
            .commands
            .send(ProviderCommand::Stop { respond_to: tx })
            .await
            .map_err(|_| ProviderError::ChannelClosed)?;

        let report = rx.await.map_err(|_| ProviderError::ChannelClosed)?;

        if report.is_clean() {
            info!(sessions = report.attempted, "Sessions shut down");
        } else {
            warn!(
                sessions = report.attempted,
                failed = report.failures.len(),
                "Some sessions failed to shut down"
            );
        }

        Ok(report)
    }

    /// Returns the bound address while listening.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.state.lock().await {
            ProviderState::Listening(listening) => Some(listening.local_addr),
            _ => None,
        }
    }

    /// Returns true while the listener is open.
    pub async fn is_listening(&self) -> bool {
        matches!(*self.state.lock().await, ProviderState::Listening(_))
    }

    /// Number of registered connections.
    ///
    /// Returns 0 when not listening or if the actor cannot be reached.
    pub async fn connection_count(&self) -> usize {
        let Some(commands) = self.commands().await else {
            return 0;
        };

        let (tx, rx) = oneshot::channel();
        if commands
            .send(ProviderCommand::ConnectionCount { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or_default()
    }

    /// Session bound to an open connection.
    pub async fn session(&self, connection: ConnectionId) -> Option<SessionRef> {
        let commands = self.commands().await?;

        let (tx, rx) = oneshot::channel();
        commands
            .send(ProviderCommand::GetSession {
                connection,
                respond_to: tx,
            })
            .await
            .ok()?;

        rx.await.ok()?
    }

    async fn commands(&self) -> Option<mpsc::Sender<ProviderCommand>> {
        match &*self.state.lock().await {
            ProviderState::Listening(listening) => Some(listening.commands.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl LifecycleSubscriber for RouterTransportProvider {
    fn name(&self) -> &str {
        "raw_socket_router"
    }

    fn subscribed_signals(&self) -> Vec<(LifecycleSignal, i32)> {
        vec![
            (LifecycleSignal::RouterStart, PROVIDER_PRIORITY),
            (LifecycleSignal::RouterStop, PROVIDER_PRIORITY),
        ]
    }

    async fn on_signal(&self, signal: LifecycleSignal) -> Result<(), ProviderError> {
        match signal {
            LifecycleSignal::RouterStart => self.start(&Handle::current()).await.map(|_| ()),
            LifecycleSignal::RouterStop => self.stop().await.map(|_| ()),
        }
    }
}

/// Accepts connections until cancelled.
///
/// Cancellation wins over a pending accept, and the listener is dropped
/// (closing the socket) when the loop exits.
async fn accept_loop(
    listener: TcpListener,
    commands: mpsc::Sender<ProviderCommand>,
    cancel: CancellationToken,
) {
    let mut next_id: u64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Accept loop shutting down");
                break;
            }

            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(error = %e, "Failed to set TCP_NODELAY");
                        }

                        next_id += 1;
                        let connection = ConnectionId::new(next_id);
                        let raw = RawConnection::new(stream, Some(peer.to_string()));

                        if commands
                            .send(ProviderCommand::Accept { connection, raw })
                            .await
                            .is_err()
                        {
                            debug!("Connection actor gone, accept loop stopping");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        // Continue accepting other connections
                    }
                }
            }
        }
    }
}
