//! Error taxonomy for the crypto layer.
//!
//! Handshake failures and record-layer failures are kept apart because they
//! demand different reactions from the connection: a handshake failure aborts
//! the attempt outright, while some cipher failures only indicate that the
//! channel must be torn down and re-established.

use thiserror::Error;

/// A handshake could not be completed.
///
/// All variants are terminal for the attempt. The engine poisons itself on
/// the first error; the ephemeral key is never reused.
///
/// A peer that simply stops responding is not represented here: the engine
/// holds no clock, so stalled handshakes are cut off by the connection
/// layer's handshake deadline and reported as a timeout close there.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// An authentication tag did not verify against the transcript. Either
    /// the peer does not hold the static key it claims, or the exchange was
    /// tampered with in flight.
    #[error("handshake authentication mismatch")]
    AuthenticationMismatch,

    /// The peer proposed a protocol version we do not speak.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// A handshake message had the wrong length for the current step.
    #[error("malformed handshake message: {0}")]
    Malformed(&'static str),

    /// A message arrived for a step the engine is not in, or the engine was
    /// used after a previous failure.
    #[error("handshake engine in invalid state: {0}")]
    InvalidState(&'static str),
}

/// A post-handshake frame could not be sealed or opened.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The authentication tag did not match. The frame was corrupted or
    /// forged; the connection must close.
    #[error("frame authentication failed")]
    AuthenticationFailed,

    /// The frame is too short to contain an IV and a tag.
    #[error("frame truncated: {len} bytes, minimum {min}")]
    Truncated {
        /// Observed frame length.
        len: usize,
        /// Smallest valid frame length.
        min: usize,
    },

    /// The frame's IV does not match the expected counter position, or the
    /// counter space is exhausted. Frames were lost, reordered, or replayed;
    /// only a fresh handshake recovers the channel.
    #[error("frame counter desynchronized")]
    CounterDesync,
}
