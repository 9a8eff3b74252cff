//! TCP transport.

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use treeline_core::error::TransportError;
use treeline_core::transport::Transport;

/// Dials a fixed `host:port` over TCP.
///
/// Frames are small and latency-sensitive, so Nagle's algorithm is disabled
/// on every stream.
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    /// A transport dialing `addr` on every connection attempt.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type SendHalf = OwnedWriteHalf;
    type RecvHalf = OwnedReadHalf;

    async fn connect(&self) -> Result<(Self::SendHalf, Self::RecvHalf), TransportError> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok((writer, reader))
    }
}
