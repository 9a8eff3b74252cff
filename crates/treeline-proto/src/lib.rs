//! Wire format for the Treeline protocol.
//!
//! Every message exchanged with the remote peer is a tree of [`Node`]s: a tag,
//! an attribute map, and typed content (empty, one child, a child list, raw
//! bytes, or text). Trees are serialized with a compact binary encoding that
//! substitutes single-byte tokens for the most common tag and attribute
//! strings and packs phone-number-shaped identifiers into structured fields.
//!
//! The token dictionary and discriminant bytes are a fixed, versioned contract
//! with the remote peer, not an implementation detail: the decoder must accept
//! exactly what the peer's encoder produces, and vice versa.
//!
//! On the wire each encoded tree travels inside a frame: a 3-byte big-endian
//! length prefix followed by the (possibly encrypted) payload. See [`frame`].
//!
//! # Security
//!
//! Decoding never trusts a peer-supplied length field: every declared length
//! is checked against the remaining buffer before any allocation, and list
//! counts are bounded the same way. Malformed input is rejected with a typed
//! [`CodecError`], never a panic.

pub mod codec;
pub mod errors;
pub mod frame;
pub mod jid;
pub mod node;
pub mod tokens;

pub use codec::{decode, encode};
pub use errors::{CodecError, FrameError};
pub use frame::FrameBuffer;
pub use jid::Jid;
pub use node::{Node, NodeContent};
