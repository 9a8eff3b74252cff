//! Error types for the connection engine.

use thiserror::Error;
use treeline_crypto::{CipherError, HandshakeError};
use treeline_proto::{CodecError, FrameError};

use crate::connection::ConnectionState;

/// Why a connection reached the closed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The application asked for the close.
    LocalRequest,
    /// The server rejected our credentials. Retrying with the same
    /// credentials will not help.
    AuthRejected {
        /// Failure code reported by the server.
        code: u16,
    },
    /// A handshake, keepalive, or idle deadline expired.
    Timeout,
    /// The transport failed or the peer hung up.
    Transport,
    /// The peer sent something the protocol does not allow here.
    Protocol,
    /// Frame decryption failed or the record counters desynchronized.
    Crypto,
}

impl CloseReason {
    /// Whether a reconnect attempt is worthwhile.
    ///
    /// Credential rejections and protocol violations will recur on a fresh
    /// connection; everything else is plausibly transient.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::LocalRequest | Self::AuthRejected { .. } | Self::Protocol)
    }
}

/// A state machine input could not be applied.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The operation does not apply to the connection's current state.
    #[error("{operation} invalid in state {state:?}")]
    InvalidState {
        /// State the connection was in.
        state: ConnectionState,
        /// What was attempted.
        operation: &'static str,
    },

    /// The key exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// An encrypted frame could not be opened or sealed.
    #[error("record layer failure: {0}")]
    Cipher(#[from] CipherError),

    /// An inbound payload was not a well-formed node.
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    /// An outbound payload exceeded the frame size limit.
    #[error("framing failure: {0}")]
    Frame(#[from] FrameError),

    /// The peer sent a node the current state has no use for.
    #[error("unexpected <{tag}> in state {state:?}")]
    UnexpectedNode {
        /// Tag of the offending node.
        tag: String,
        /// State the connection was in.
        state: ConnectionState,
    },
}

impl ConnectionError {
    /// Map a processing failure to the close reason the driver should report.
    #[must_use]
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Handshake(_) | Self::Cipher(_) => CloseReason::Crypto,
            Self::Codec(_) | Self::Frame(_) | Self::UnexpectedNode { .. } => CloseReason::Protocol,
            Self::InvalidState { .. } => CloseReason::Protocol,
        }
    }
}

/// A request did not produce a response node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// No response arrived before the request deadline.
    #[error("request timed out")]
    Timeout,

    /// The server answered with an error node.
    #[error("server error {code}")]
    RemoteError {
        /// Numeric error code from the response.
        code: u16,
        /// Optional human-readable reason.
        text: Option<String>,
    },

    /// The connection closed before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,
}

impl RequestError {
    /// Whether retrying the same request on a healthy connection could
    /// succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::ConnectionClosed)
    }
}

/// A fire-and-forget send could not be handed to the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The connection is not open yet, or is closing.
    #[error("connection is not open")]
    NotOpen,

    /// The driver is gone; no further sends will ever succeed.
    #[error("connection closed")]
    ConnectionClosed,
}

/// A failure in the byte transport underneath the engine.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket-level failure.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The transport was used after it was shut down.
    #[error("transport closed")]
    Closed,
}
