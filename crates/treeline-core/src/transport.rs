//! Transport abstraction underneath the connection engine.
//!
//! The engine itself is sans-IO; the driver moves bytes between the state
//! machine and whatever implements [`Transport`]. Production uses TCP, tests
//! use in-memory duplex pipes.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;

/// A dialer producing one bidirectional byte stream per connection attempt.
///
/// The stream carries length-prefixed frames; the transport itself is
/// oblivious to framing and encryption. Endpoint addressing is the
/// implementation's concern, so reconnects just call [`Transport::connect`]
/// again.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Write half of an established stream.
    type SendHalf: AsyncWrite + Unpin + Send + 'static;

    /// Read half of an established stream.
    type RecvHalf: AsyncRead + Unpin + Send + 'static;

    /// Establish a fresh stream to the configured endpoint.
    async fn connect(&self) -> Result<(Self::SendHalf, Self::RecvHalf), TransportError>;
}
