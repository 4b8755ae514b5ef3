//! rawsock - Raw-socket router and client demo
//!
//! Runs a router that echoes every message back to its sender, or a
//! client that sends one message and prints what comes back.
//!
//! # Usage
//!
//! ```bash
//! # Start an echo router on the configured address
//! rawsock router --config rawsock.toml
//!
//! # Override the listening port
//! RAWSOCK_PORT=9001 rawsock router
//!
//! # Send a message and print replies
//! rawsock client --port 9001 '[1,"realm1",{}]'
//!
//! # Enable debug logging
//! RUST_LOG=rawsock_transport=debug rawsock router
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown (listener closed, sessions drained)

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rawsock_core::Message;
use rawsock_transport::{
    BroadcastDispatcher, Client, ClientTransportProvider, LifecycleBus, LifecycleEvent,
    LifecycleSignal, ProviderConfig, Router, RouterTransportProvider, Session, SessionError,
    SessionRef, TransportHandle,
};
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// rawsock - raw-socket transport demo
#[derive(Parser, Debug)]
#[command(name = "rawsock", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an echo router until SIGTERM/SIGINT
    Router {
        /// TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listening address
        #[arg(long)]
        address: Option<String>,

        /// Listening port
        #[arg(short, long)]
        port: Option<u16>,

        /// Mark accepted transports as trusted
        #[arg(long)]
        trusted: bool,
    },
    /// Connect once, send a message and print replies
    Client {
        /// Router address
        #[arg(long)]
        address: Option<String>,

        /// Router port
        #[arg(short, long)]
        port: Option<u16>,

        /// Seconds to wait for replies before closing
        #[arg(long, default_value_t = 2)]
        wait: u64,

        /// Message as a JSON array, e.g. '[1,"realm1",{}]'
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rawsock=info".parse()?)
                .add_directive("rawsock_transport=info".parse()?),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Router {
            config,
            address,
            port,
            trusted,
        } => {
            let mut config = load_config(config)?;
            if let Some(address) = address {
                config.address = address;
            }
            if let Some(port) = port {
                config.port = port;
            }
            config.trusted |= trusted;
            run_router(config).await
        }
        Command::Client {
            address,
            port,
            wait,
            message,
        } => {
            let mut config = load_config(None)?;
            if let Some(address) = address {
                config.address = address;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let value = serde_json::from_str(&message).context("Message is not valid JSON")?;
            let message = Message::from_value(value).context("Message is not a protocol message")?;
            run_client(config, message, Duration::from_secs(wait)).await
        }
    }
}

/// Loads the configuration file (if any), then applies environment overrides.
fn load_config(path: Option<PathBuf>) -> Result<ProviderConfig> {
    let config = match path {
        Some(path) => ProviderConfig::load(&path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ProviderConfig::default(),
    };
    config.apply_env().context("Invalid environment override")
}

// ============================================================================
// Router
// ============================================================================

/// Session that writes every message back to its own connection.
struct EchoSession {
    transport: TransportHandle,
}

impl Session for EchoSession {
    fn dispatch_message(&self, msg: Message) {
        if let Err(e) = self.transport.send(&msg) {
            warn!(connection = %self.transport.connection_id(), error = %e, "Echo failed");
        }
    }

    fn shutdown(&self) -> Result<(), SessionError> {
        self.transport.close();
        Ok(())
    }
}

struct EchoRouter;

impl Router for EchoRouter {
    fn create_new_session(&self, transport: TransportHandle) -> SessionRef {
        Arc::new(EchoSession { transport })
    }
}

async fn run_router(config: ProviderConfig) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "rawsock router starting"
    );

    let dispatcher = Arc::new(BroadcastDispatcher::new());
    let mut events = dispatcher.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                LifecycleEvent::ConnectionOpen { connection, .. } => {
                    info!(connection = %connection, "Session opened");
                }
                LifecycleEvent::ConnectionClose { connection, .. } => {
                    info!(connection = %connection, "Session closed");
                }
            }
        }
    });

    let provider = Arc::new(RouterTransportProvider::new(
        config,
        Arc::new(EchoRouter),
        dispatcher,
    ));

    let mut bus = LifecycleBus::new();
    bus.subscribe(provider.clone());

    let failures = bus.emit(LifecycleSignal::RouterStart).await;
    if let Some((name, e)) = failures.into_iter().next() {
        bail!("{name} failed to start: {e}");
    }

    if let Err(e) = wait_for_shutdown_signal().await {
        error!(error = %e, "Error waiting for shutdown signal");
    }
    info!("Shutdown signal received");

    for (name, e) in bus.emit(LifecycleSignal::RouterStop).await {
        error!(subscriber = %name, error = %e, "Stop failed");
    }

    info!("rawsock router stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

// ============================================================================
// Client
// ============================================================================

/// Client printing every message it receives.
struct PrintingClient;

impl Client for PrintingClient {
    fn on_open(&self, transport: &TransportHandle) {
        info!(connection = %transport.connection_id(), "Connected");
    }

    fn on_message(&self, _transport: &TransportHandle, msg: Message) {
        println!("{msg}");
    }

    fn on_close(&self, transport: &TransportHandle) {
        info!(connection = %transport.connection_id(), "Disconnected");
    }
}

async fn run_client(config: ProviderConfig, message: Message, wait: Duration) -> Result<()> {
    let provider = ClientTransportProvider::new(config);
    let connection = provider
        .start(Arc::new(PrintingClient), &Handle::current())
        .await?;

    connection
        .transport()
        .send(&message)
        .context("Failed to send message")?;

    // The router may close first; otherwise stop waiting after `wait`.
    let closed = tokio::time::timeout(wait, async {
        while !connection.transport().is_closed() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;

    if closed.is_err() {
        info!("No more replies, closing");
    }
    connection.close().await;
    Ok(())
}
