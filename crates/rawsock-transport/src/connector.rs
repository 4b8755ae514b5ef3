//! Outbound connection strategy.
//!
//! The client provider dials through a [`Connector`] so tests can swap the
//! real TCP dial for an in-process stream.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Byte stream a transport can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased byte stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// An open byte stream plus what is known about its remote end.
pub struct RawConnection {
    pub peer_addr: Option<String>,
    pub stream: BoxedStream,
}

impl RawConnection {
    pub fn new(stream: impl AsyncStream + 'static, peer_addr: Option<String>) -> Self {
        Self {
            peer_addr,
            stream: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawConnection")
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

/// Dials an outbound connection.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, addr: &str) -> io::Result<RawConnection>;
}

/// Production connector: a plain TCP dial on the current runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, addr: &str) -> io::Result<RawConnection> {
        let stream = TcpStream::connect(addr).await?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        Ok(RawConnection::new(stream, peer_addr))
    }
}
