//! Token dictionary and discriminant bytes for the tree encoding.
//!
//! These values are a versioned wire contract shared with the remote peer.
//! Changing an existing assignment breaks compatibility; new assignments may
//! only use bytes listed as reserved below.
//!
//! # Byte space layout
//!
//! - `0x00`: empty list
//! - `0x01`-`0x02`: reserved
//! - `0x03`-`0xEF`: dictionary tokens (index = byte - 0x03)
//! - `0xF0`-`0xF4`: reserved
//! - `0xF5`-`0xFF`: structural discriminants (single child, JID forms,
//!   list/binary/text length tags)
//!
//! Unassigned bytes MUST be rejected by the decoder with
//! [`CodecError::UnknownTag`](crate::CodecError::UnknownTag), never skipped.

/// Empty child list.
pub const LIST_EMPTY: u8 = 0x00;

/// First dictionary token byte.
pub const DICT_MIN: u8 = 0x03;

/// Last dictionary token byte.
pub const DICT_MAX: u8 = 0xEF;

/// Single child node follows.
pub const SINGLE: u8 = 0xF5;

/// Device-qualified JID: agent byte, device byte, user string, server string.
pub const DEVICE_JID: u8 = 0xF6;

/// Plain JID: user string, server string.
pub const JID_PAIR: u8 = 0xF7;

/// List with a `u8` element count.
pub const LIST_8: u8 = 0xF8;

/// List with a big-endian `u16` element count.
pub const LIST_16: u8 = 0xF9;

/// Text with a `u8` byte length.
pub const TEXT_8: u8 = 0xFA;

/// Text with a 20-bit big-endian byte length (3 bytes, high nibble zero).
pub const TEXT_20: u8 = 0xFB;

/// Raw bytes with a `u8` length.
pub const BINARY_8: u8 = 0xFC;

/// Raw bytes with a 20-bit big-endian length.
pub const BINARY_20: u8 = 0xFD;

/// Raw bytes with a big-endian `u32` length.
pub const BINARY_32: u8 = 0xFE;

/// Text with a big-endian `u32` byte length.
pub const TEXT_32: u8 = 0xFF;

/// Fixed dictionary of frequently occurring tag and attribute strings.
///
/// Index order is part of the wire contract. Append only.
pub const DICTIONARY: [&str; 48] = [
    "iq",
    "message",
    "presence",
    "receipt",
    "notification",
    "ack",
    "auth",
    "success",
    "failure",
    "stream:error",
    "ping",
    "pong",
    "to",
    "from",
    "id",
    "type",
    "xmlns",
    "class",
    "category",
    "participant",
    "result",
    "error",
    "get",
    "set",
    "subscribe",
    "unavailable",
    "available",
    "composing",
    "paused",
    "read",
    "delivery",
    "played",
    "urn:tl:ping",
    "urn:tl:auth",
    "urn:tl:media",
    "urn:tl:sync",
    "tl.net",
    "g.tl.net",
    "broadcast.tl.net",
    "device",
    "agent",
    "token",
    "code",
    "reason",
    "timestamp",
    "count",
    "body",
    "enc",
];

/// Look up the dictionary token for a string, if it has one.
#[must_use]
pub fn token_for(s: &str) -> Option<u8> {
    DICTIONARY.iter().position(|entry| *entry == s).map(|index| DICT_MIN + index as u8)
}

/// Resolve a dictionary token byte back to its string.
///
/// Returns `None` for bytes inside the dictionary range that have no
/// assignment yet.
#[must_use]
pub fn string_for(token: u8) -> Option<&'static str> {
    if !(DICT_MIN..=DICT_MAX).contains(&token) {
        return None;
    }
    DICTIONARY.get(usize::from(token - DICT_MIN)).copied()
}
