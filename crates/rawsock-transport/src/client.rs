//! Client-side raw-socket transport provider.
//!
//! The provider dials once, wires the resulting connection to a
//! [`Client`] peer and tracks exactly one connection/transport pair. There
//! is no registry on this side and no reconnection: a dropped connection
//! ends with `on_close`, and a failed dial is returned to the caller.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use rawsock_core::{ConnectionId, ConnectionInfo, PeerKind};
use rawsock_protocol::Serializer;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProviderConfig;
use crate::connector::{Connector, TcpConnector};
use crate::error::ProviderError;
use crate::peer::Client;
use crate::transport::{spawn_writer, Outbound, RawSocketTransport, TransportHandle};

/// Read buffer reserved per read call.
const READ_BUFFER_SIZE: usize = 8 * 1024;

// ============================================================================
// Client Transport Provider
// ============================================================================

/// Raw-socket transport provider for a client.
///
/// # Example
///
/// ```rust,ignore
/// use rawsock_transport::{ClientTransportProvider, ProviderConfig};
///
/// let provider = ClientTransportProvider::new(ProviderConfig::new("127.0.0.1", 9001));
/// let connection = provider.start(client, &tokio::runtime::Handle::current()).await?;
/// connection.closed().await;
/// ```
pub struct ClientTransportProvider {
    config: ProviderConfig,
    connector: Arc<dyn Connector>,
    next_id: AtomicU64,
}

impl ClientTransportProvider {
    /// Creates a provider dialling over plain TCP.
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            connector: Arc::new(TcpConnector),
            next_id: AtomicU64::new(0),
        }
    }

    /// Replaces the connector, e.g. with an in-process test double.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Issues exactly one connect to the configured address.
    ///
    /// On success the client has already received `on_open`, and a driver
    /// task spawned on `handle` delivers messages until the connection
    /// closes. Nothing is retried.
    ///
    /// # Errors
    ///
    /// `ProviderError::ConnectFailed` if the dial fails; the client receives
    /// no callbacks in that case.
    pub async fn start(
        &self,
        client: Arc<dyn Client>,
        handle: &Handle,
    ) -> Result<ClientConnection, ProviderError> {
        let addr = self.config.socket_addr();
        debug!(address = %addr, "Raw socket connecting");

        let raw = self.connector.connect(&addr).await.map_err(|e| {
            warn!(address = %addr, error = %e, "Raw socket connect failed");
            ProviderError::ConnectFailed {
                addr: addr.clone(),
                error: e.to_string(),
            }
        })?;

        let connection = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let info = ConnectionInfo::new(connection, raw.peer_addr, PeerKind::Client);

        let (reader, writer) = tokio::io::split(raw.stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        // Enter the runtime so the writer lands on the same loop as the driver.
        let writer_task = {
            let _guard = handle.enter();
            spawn_writer(connection, writer, outbound_rx)
        };

        let mut driver = ClientDriver::new(
            client,
            self.config.serializer.build(),
            self.config.max_frame_len,
        );
        let transport = driver.on_connected(info, outbound_tx);

        let cancel = CancellationToken::new();
        let task = handle.spawn(driver.run(reader, cancel.clone()));

        Ok(ClientConnection {
            connection,
            transport,
            cancel,
            task,
            writer_task,
        })
    }
}

// ============================================================================
// Client Driver
// ============================================================================

/// Wires one connection's events to a [`Client`].
///
/// `on_connected`, `on_data` and `on_close` are the provider's reactions to
/// connect, inbound bytes and the close signal; `run` drives them from a
/// socket read half.
pub struct ClientDriver {
    client: Arc<dyn Client>,
    serializer: Arc<dyn Serializer>,
    max_frame_len: usize,
    transport: Option<RawSocketTransport>,
    closed: bool,
}

impl ClientDriver {
    pub fn new(client: Arc<dyn Client>, serializer: Arc<dyn Serializer>, max_frame_len: usize) -> Self {
        Self {
            client,
            serializer,
            max_frame_len,
            transport: None,
            closed: false,
        }
    }

    /// Creates the transport for a fresh connection and opens the client.
    ///
    /// `on_open` runs after the transport exists and before any message
    /// can be dispatched.
    pub fn on_connected(
        &mut self,
        info: ConnectionInfo,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> TransportHandle {
        let mut transport = RawSocketTransport::new(info, outbound, self.max_frame_len);
        transport.set_serializer(Arc::clone(&self.serializer));

        let client = Arc::clone(&self.client);
        transport.on_message(move |handle, msg| client.on_message(handle, msg));

        let handle = transport.handle();
        info!(
            connection = %handle.connection_id(),
            peer = handle.info().peer_label(),
            "Raw socket connected"
        );

        self.transport = Some(transport);
        self.client.on_open(&handle);
        handle
    }

    /// Forwards inbound bytes to the transport.
    ///
    /// # Errors
    ///
    /// - `ProviderError::InvariantViolation` if called before `on_connected`
    /// - `ProviderError::Transport` on a framing error
    pub fn on_data(&mut self, bytes: &[u8]) -> Result<usize, ProviderError> {
        let transport = self.transport.as_mut().ok_or_else(|| {
            ProviderError::InvariantViolation("data before connection opened".to_string())
        })?;

        Ok(transport.handle_data(bytes)?)
    }

    /// Reports the close to the client, once.
    pub fn on_close(&mut self) {
        if self.closed {
            return;
        }

        let Some(transport) = self.transport.as_ref() else {
            debug!("Close before connection opened; nothing to report");
            return;
        };

        self.closed = true;
        let handle = transport.handle();
        handle.close();

        info!(
            connection = %handle.connection_id(),
            open_ms = handle.info().age().as_millis() as u64,
            "Raw socket closed"
        );
        self.client.on_close(&handle);
    }

    /// Reads until EOF, a read error, a framing error or cancellation, then
    /// calls `on_close`.
    pub async fn run<R>(mut self, mut reader: R, cancel: CancellationToken)
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        loop {
            buf.reserve(READ_BUFFER_SIZE);

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Client driver cancelled");
                    break;
                }
                result = reader.read_buf(&mut buf) => result,
            };

            match result {
                Ok(0) => {
                    debug!("Server closed connection");
                    break;
                }
                Ok(_) => {
                    let bytes = buf.split();
                    if let Err(e) = self.on_data(&bytes) {
                        warn!(error = %e, "Transport error, closing connection");
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Read failed");
                    break;
                }
            }
        }

        self.on_close();
    }
}

// ============================================================================
// Client Connection
// ============================================================================

/// The single live connection started by a [`ClientTransportProvider`].
pub struct ClientConnection {
    connection: ConnectionId,
    transport: TransportHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl ClientConnection {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection
    }

    /// Outbound write path of the connection.
    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    /// Waits until the connection has closed and `on_close` has run.
    pub async fn closed(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Client driver ended abnormally");
        }
        let _ = self.writer_task.await;
    }

    /// Closes the connection locally and waits for `on_close`.
    pub async fn close(self) {
        self.transport.close();
        self.cancel.cancel();
        self.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::RawConnection;
    use async_trait::async_trait;
    use rawsock_core::Message;
    use rawsock_protocol::JsonSerializer;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    #[derive(Default)]
    struct RecordingClient {
        calls: Mutex<Vec<String>>,
    }

    impl Client for RecordingClient {
        fn on_open(&self, transport: &TransportHandle) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("open:{}", transport.connection_id()));
        }

        fn on_message(&self, _transport: &TransportHandle, msg: Message) {
            self.calls.lock().unwrap().push(format!("message:{}", msg.code()));
        }

        fn on_close(&self, _transport: &TransportHandle) {
            self.calls.lock().unwrap().push("close".to_string());
        }
    }

    fn driver(client: &Arc<RecordingClient>) -> ClientDriver {
        ClientDriver::new(
            Arc::clone(client) as Arc<dyn Client>,
            Arc::new(JsonSerializer),
            1024,
        )
    }

    fn info() -> ConnectionInfo {
        ConnectionInfo::new(ConnectionId::new(1), None, PeerKind::Client)
    }

    fn wire(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x00, payload.len() as u8];
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_open_precedes_messages() {
        let client = Arc::new(RecordingClient::default());
        let mut driver = driver(&client);
        let (tx, _rx) = mpsc::unbounded_channel();

        driver.on_connected(info(), tx);
        driver.on_data(&wire(br#"[2,1,{}]"#)).unwrap();

        assert_eq!(*client.calls.lock().unwrap(), vec!["open:conn-1", "message:2"]);
    }

    #[test]
    fn test_data_before_connect_is_rejected() {
        let client = Arc::new(RecordingClient::default());
        let mut driver = driver(&client);

        let err = driver.on_data(b"anything").unwrap_err();
        assert!(matches!(err, ProviderError::InvariantViolation(_)));
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_close_reported_once() {
        let client = Arc::new(RecordingClient::default());
        let mut driver = driver(&client);
        let (tx, mut rx) = mpsc::unbounded_channel();

        driver.on_connected(info(), tx);
        driver.on_close();
        driver.on_close();

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| *c == "close").count(), 1);
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
    }

    #[test]
    fn test_close_before_connect_is_silent() {
        let client = Arc::new(RecordingClient::default());
        let mut driver = driver(&client);
        driver.on_close();
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_delivers_then_closes_on_eof() {
        use tokio::io::AsyncWriteExt;

        let client = Arc::new(RecordingClient::default());
        let mut driver = driver(&client);
        let (tx, _rx) = mpsc::unbounded_channel();
        driver.on_connected(info(), tx);

        let (local, mut remote) = tokio::io::duplex(1024);
        let task = tokio::spawn(driver.run(local, CancellationToken::new()));

        remote.write_all(&wire(br#"[36,5,{}]"#)).await.unwrap();
        remote.write_all(&wire(br#"[6,{},"bye"]"#)).await.unwrap();
        drop(remote);
        task.await.unwrap();

        assert_eq!(
            *client.calls.lock().unwrap(),
            vec!["open:conn-1", "message:36", "message:6", "close"]
        );
    }

    #[tokio::test]
    async fn test_run_closes_on_framing_error() {
        use tokio::io::AsyncWriteExt;

        let client = Arc::new(RecordingClient::default());
        let mut driver = driver(&client);
        let (tx, _rx) = mpsc::unbounded_channel();
        driver.on_connected(info(), tx);

        let (local, mut remote) = tokio::io::duplex(1024);
        let task = tokio::spawn(driver.run(local, CancellationToken::new()));

        remote.write_all(&[0x06, 0x00, 0x00, 0x00]).await.unwrap();
        task.await.unwrap();

        assert_eq!(client.calls.lock().unwrap().last().unwrap(), "close");
    }

    // ========================================================================
    // Provider Tests (in-process connector)
    // ========================================================================

    /// Connector handing out in-memory duplex streams and counting dials.
    #[derive(Default)]
    struct DuplexConnector {
        connects: AtomicUsize,
        refuse: bool,
        remotes: Mutex<Vec<DuplexStream>>,
    }

    impl DuplexConnector {
        fn refusing() -> Self {
            Self {
                refuse: true,
                ..Default::default()
            }
        }

        fn connects(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn take_remote(&self) -> DuplexStream {
            self.remotes.lock().unwrap().remove(0)
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        async fn connect(&self, addr: &str) -> io::Result<RawConnection> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("{addr} refused"),
                ));
            }

            let (local, remote) = tokio::io::duplex(1024);
            self.remotes.lock().unwrap().push(remote);
            Ok(RawConnection::new(local, Some("in-process".to_string())))
        }
    }

    fn provider(connector: &Arc<DuplexConnector>) -> ClientTransportProvider {
        ClientTransportProvider::new(ProviderConfig::new("127.0.0.1", 9001))
            .with_connector(Arc::clone(connector) as Arc<dyn Connector>)
    }

    #[tokio::test]
    async fn test_start_connects_exactly_once() {
        let connector = Arc::new(DuplexConnector::default());
        let provider = provider(&connector);
        let client = Arc::new(RecordingClient::default());

        let connection = provider
            .start(Arc::clone(&client) as Arc<dyn Client>, &Handle::current())
            .await
            .unwrap();

        assert_eq!(connector.connects(), 1);
        assert_eq!(connection.connection_id(), ConnectionId::new(1));
        assert_eq!(connection.transport().info().peer_label(), "in-process");

        let second = provider
            .start(Arc::clone(&client) as Arc<dyn Client>, &Handle::current())
            .await
            .unwrap();

        assert_eq!(connector.connects(), 2);
        assert_eq!(second.connection_id(), ConnectionId::new(2));

        connection.close().await;
        second.close().await;
    }

    #[tokio::test]
    async fn test_start_delivers_open_message_close_in_order() {
        use tokio::io::AsyncWriteExt;

        let connector = Arc::new(DuplexConnector::default());
        let client = Arc::new(RecordingClient::default());

        let connection = provider(&connector)
            .start(Arc::clone(&client) as Arc<dyn Client>, &Handle::current())
            .await
            .unwrap();

        let mut remote = connector.take_remote();
        remote.write_all(&wire(br#"[2,1,{}]"#)).await.unwrap();
        drop(remote);

        tokio::time::timeout(std::time::Duration::from_secs(2), connection.closed())
            .await
            .expect("connection closes after remote drop");

        assert_eq!(connector.connects(), 1);
        assert_eq!(
            *client.calls.lock().unwrap(),
            vec!["open:conn-1", "message:2", "close"]
        );
    }

    #[tokio::test]
    async fn test_start_reports_connect_failure() {
        let connector = Arc::new(DuplexConnector::refusing());
        let client = Arc::new(RecordingClient::default());

        let result = provider(&connector)
            .start(Arc::clone(&client) as Arc<dyn Client>, &Handle::current())
            .await;

        match result {
            Err(ProviderError::ConnectFailed { addr, error }) => {
                assert_eq!(addr, "127.0.0.1:9001");
                assert!(error.contains("refused"));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should fail"),
        }
        assert_eq!(connector.connects(), 1);
        assert!(client.calls.lock().unwrap().is_empty());
    }
}
