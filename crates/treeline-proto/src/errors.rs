//! Error types for the wire format.
//!
//! Codec errors are fatal to the frame being decoded, never to the
//! connection; the connection layer decides what to do with them (during the
//! handshake any codec error aborts the attempt).

use thiserror::Error;

/// Errors produced while encoding or decoding a node tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The buffer ended before a declared length was satisfied.
    #[error("buffer ended {needed} byte(s) short of a declared length")]
    Truncated {
        /// How many more bytes the declared length required.
        needed: usize,
    },

    /// A discriminant byte outside the defined token set.
    #[error("unknown wire token {0:#04x}")]
    UnknownTag(u8),

    /// Internally inconsistent data (arity mismatch, duplicate attribute,
    /// non-canonical length encoding, invalid UTF-8 in a string position).
    #[error("malformed node: {0}")]
    Malformed(&'static str),
}

/// Errors produced by frame delimiting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Payload does not fit in the 3-byte length prefix.
    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    Oversized {
        /// Actual payload length.
        len: usize,
        /// Maximum representable payload length.
        max: usize,
    },
}
