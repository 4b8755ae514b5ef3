//! Framing adapter between one connection's bytes and protocol messages.
//!
//! A `RawSocketTransport` is owned by the provider that created it. It
//! buffers inbound bytes, decodes complete frames, answers pings and hands
//! each decoded message to its listener. The outbound side is a
//! `TransportHandle`, a cheap clone given to the session or client, which
//! serializes messages and queues the encoded frames for a writer task.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Write failures end the writer task and are logged, never propagated as panics

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rawsock_core::{ConnectionId, ConnectionInfo, Message};
use rawsock_protocol::{Frame, FrameKind, JsonSerializer, RawSocketCodec, Serializer};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::error::TransportError;

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Listener invoked for every decoded message.
type MessageListener = Box<dyn FnMut(&TransportHandle, Message) + Send>;

/// Item queued for the writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Encoded frame bytes.
    Data(Bytes),
    /// Flush and shut down the write half.
    Close,
}

// ============================================================================
// Transport Handle
// ============================================================================

/// Outbound write path of a transport.
///
/// Captures the serializer and trust flag in effect when it was taken, so
/// providers configure the transport before handing handles out.
#[derive(Clone)]
pub struct TransportHandle {
    info: Arc<ConnectionInfo>,
    serializer: Arc<dyn Serializer>,
    codec: RawSocketCodec,
    trusted: bool,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle {
    pub fn connection_id(&self) -> ConnectionId {
        self.info.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Serializes and queues one message.
    ///
    /// # Errors
    ///
    /// - `TransportError::Serializer` if the message cannot be encoded
    /// - `TransportError::Frame` if it exceeds the frame size limit
    /// - `TransportError::Closed` if the writer has shut down
    pub fn send(&self, msg: &Message) -> Result<(), TransportError> {
        let payload = self.serializer.serialize(msg)?;
        self.send_frame(Frame::message(payload))
    }

    fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        let mut codec = self.codec;
        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf)?;
        self.outbound
            .send(Outbound::Data(buf.freeze()))
            .map_err(|_| TransportError::Closed)
    }

    /// Asks the writer to flush and shut down the connection's write half.
    ///
    /// Idempotent; closing an already closed transport does nothing.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Returns true once the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("connection", &self.info.id)
            .field("serializer", &self.serializer.name())
            .field("trusted", &self.trusted)
            .finish()
    }
}

// ============================================================================
// Raw Socket Transport
// ============================================================================

/// Framing adapter bound to exactly one connection and one peer.
pub struct RawSocketTransport {
    info: Arc<ConnectionInfo>,
    codec: RawSocketCodec,
    buffer: BytesMut,
    serializer: Arc<dyn Serializer>,
    trusted: bool,
    outbound: mpsc::UnboundedSender<Outbound>,
    listener: Option<MessageListener>,
}

impl RawSocketTransport {
    /// Creates a transport writing through `outbound`.
    ///
    /// Starts with the JSON serializer and untrusted.
    pub fn new(
        info: ConnectionInfo,
        outbound: mpsc::UnboundedSender<Outbound>,
        max_payload_len: usize,
    ) -> Self {
        Self {
            info: Arc::new(info),
            codec: RawSocketCodec::new(max_payload_len),
            buffer: BytesMut::new(),
            serializer: Arc::new(JsonSerializer),
            trusted: false,
            outbound,
            listener: None,
        }
    }

    pub fn set_serializer(&mut self, serializer: Arc<dyn Serializer>) {
        self.serializer = serializer;
    }

    /// Marks the transport as trusted. Only meaningful on the router side.
    pub fn set_trusted(&mut self, trusted: bool) {
        self.trusted = trusted;
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.info.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Subscribes to decoded messages, replacing any previous listener.
    pub fn on_message<F>(&mut self, listener: F)
    where
        F: FnMut(&TransportHandle, Message) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Returns a handle to the outbound write path.
    pub fn handle(&self) -> TransportHandle {
        TransportHandle {
            info: Arc::clone(&self.info),
            serializer: Arc::clone(&self.serializer),
            codec: self.codec,
            trusted: self.trusted,
            outbound: self.outbound.clone(),
        }
    }

    /// Feeds raw inbound bytes and emits every message they complete.
    ///
    /// Incomplete frames stay buffered until more bytes arrive. Payloads the
    /// serializer rejects are logged and skipped.
    ///
    /// Returns the number of messages delivered to the listener.
    ///
    /// # Errors
    ///
    /// `TransportError::Frame` on a malformed header or oversized frame; the
    /// stream cannot be resynchronised, so the caller should close the
    /// connection.
    pub fn handle_data(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.buffer.extend_from_slice(data);

        let handle = self.handle();
        let mut delivered = 0;

        while let Some(frame) = self.codec.decode(&mut self.buffer)? {
            match frame.kind {
                FrameKind::Message => match self.serializer.deserialize(&frame.payload) {
                    Ok(msg) => {
                        trace!(connection = %self.info.id, code = msg.code(), "Decoded message");
                        match self.listener.as_mut() {
                            Some(listener) => {
                                listener(&handle, msg);
                                delivered += 1;
                            }
                            None => {
                                warn!(connection = %self.info.id, "No message listener, dropping message");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(connection = %self.info.id, error = %e, "Dropping undecodable message");
                    }
                },
                FrameKind::Ping => {
                    if let Err(e) = handle.send_frame(Frame::pong(frame.payload)) {
                        debug!(connection = %self.info.id, error = %e, "Failed to answer ping");
                    }
                }
                FrameKind::Pong => {
                    trace!(connection = %self.info.id, "Received pong");
                }
            }
        }

        Ok(delivered)
    }
}

impl fmt::Debug for RawSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSocketTransport")
            .field("connection", &self.info.id)
            .field("peer_kind", &self.info.peer_kind)
            .field("buffered", &self.buffer.len())
            .field("trusted", &self.trusted)
            .finish()
    }
}

// ============================================================================
// Writer Task
// ============================================================================

/// Spawns the task owning a connection's write half.
///
/// Runs until `Outbound::Close`, a write failure, or every sender is
/// dropped; then shuts the write half down.
pub fn spawn_writer<W>(
    connection: ConnectionId,
    writer: W,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut writer = BufWriter::new(writer);

        while let Some(item) = outbound.recv().await {
            let bytes = match item {
                Outbound::Data(bytes) => bytes,
                Outbound::Close => {
                    debug!(connection = %connection, "Transport close requested");
                    break;
                }
            };

            let result = timeout(WRITE_TIMEOUT, async {
                writer.write_all(&bytes).await?;
                writer.flush().await?;
                Ok::<(), std::io::Error>(())
            })
            .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(connection = %connection, error = %e, "Write failed");
                    break;
                }
                Err(_) => {
                    warn!(connection = %connection, "Write timed out");
                    break;
                }
            }
        }

        outbound.close();
        if let Err(e) = writer.shutdown().await {
            trace!(connection = %connection, error = %e, "Write half shutdown failed");
        }
    })
}
