//! Binary tree codec: [`encode`] and [`decode`].
//!
//! A node is encoded as a list whose arity is `1 (tag) + 2 * attrs +
//! (0 or 1) content element`. Strings use a dictionary token when possible,
//! otherwise a length-prefixed text form; attribute values that are canonical
//! JIDs use the packed JID forms. Content is discriminated by its leading
//! byte: empty list, list header, single-child marker, binary length tag, or
//! any string form (text).
//!
//! `decode` is the exact inverse: `decode(&encode(n)?) == n` for every
//! well-formed node within the nesting bound. The decoder validates every
//! declared length against the remaining buffer before allocating and caps
//! how deep it will follow nested children.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::CodecError;
use crate::jid::Jid;
use crate::node::{Node, NodeContent};
use crate::tokens;

/// Encode a node tree into its wire form.
///
/// Deterministic and total for well-formed nodes; the only failures are
/// pathological sizes (more than `u16::MAX` list elements or a payload
/// longer than `u32::MAX` bytes).
pub fn encode(node: &Node) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(64);
    write_node(&mut buf, node)?;
    Ok(buf.freeze())
}

/// Decode a wire buffer into a node tree.
///
/// The buffer must contain exactly one encoded node; trailing bytes and
/// nesting deeper than 128 levels are rejected as [`CodecError::Malformed`].
pub fn decode(bytes: &[u8]) -> Result<Node, CodecError> {
    let mut decoder = Decoder { buf: bytes, pos: 0, depth: 0 };
    let node = decoder.read_node()?;
    if decoder.remaining() != 0 {
        return Err(CodecError::Malformed("trailing bytes after node"));
    }
    Ok(node)
}

fn write_node(buf: &mut BytesMut, node: &Node) -> Result<(), CodecError> {
    let has_content = !matches!(node.content(), NodeContent::Empty);
    let arity = 1 + 2 * node.attrs().len() + usize::from(has_content);
    write_list_header(buf, arity)?;
    write_string(buf, node.tag())?;

    for (key, value) in node.attrs() {
        write_string(buf, key)?;
        write_attr_value(buf, value)?;
    }

    match node.content() {
        NodeContent::Empty => {},
        NodeContent::Single(child) => {
            buf.put_u8(tokens::SINGLE);
            write_node(buf, child)?;
        },
        NodeContent::List(children) => {
            write_list_header(buf, children.len())?;
            for child in children {
                write_node(buf, child)?;
            }
        },
        NodeContent::Binary(data) => {
            write_length_tagged(
                buf,
                (tokens::BINARY_8, tokens::BINARY_20, tokens::BINARY_32),
                data,
            )?;
        },
        NodeContent::Text(text) => write_string(buf, text)?,
    }
    Ok(())
}

fn write_list_header(buf: &mut BytesMut, count: usize) -> Result<(), CodecError> {
    if count == 0 {
        buf.put_u8(tokens::LIST_EMPTY);
    } else if count <= usize::from(u8::MAX) {
        buf.put_u8(tokens::LIST_8);
        buf.put_u8(count as u8);
    } else if count <= usize::from(u16::MAX) {
        buf.put_u8(tokens::LIST_16);
        buf.put_u16(count as u16);
    } else {
        return Err(CodecError::Malformed("list too long for wire format"));
    }
    Ok(())
}

fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    if let Some(token) = tokens::token_for(s) {
        buf.put_u8(token);
        return Ok(());
    }
    write_length_tagged(buf, (tokens::TEXT_8, tokens::TEXT_20, tokens::TEXT_32), s.as_bytes())
}

/// Attribute values get the packed JID encoding when they are canonical JID
/// strings; everything else is an ordinary string.
fn write_attr_value(buf: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    match Jid::canonical(value) {
        Some(jid) if jid.is_device_qualified() => {
            buf.put_u8(tokens::DEVICE_JID);
            buf.put_u8(jid.agent);
            buf.put_u8(jid.device);
            write_string(buf, &jid.user)?;
            write_string(buf, &jid.server)
        },
        Some(jid) => {
            buf.put_u8(tokens::JID_PAIR);
            write_string(buf, &jid.user)?;
            write_string(buf, &jid.server)
        },
        None => write_string(buf, value),
    }
}

/// Tagged-width length encoding: 8-bit, 20-bit, or 32-bit magnitude.
fn write_length_tagged(
    buf: &mut BytesMut,
    (tag8, tag20, tag32): (u8, u8, u8),
    data: &[u8],
) -> Result<(), CodecError> {
    let len = data.len();
    if len <= usize::from(u8::MAX) {
        buf.put_u8(tag8);
        buf.put_u8(len as u8);
    } else if len < (1 << 20) {
        buf.put_u8(tag20);
        buf.put_u8((len >> 16) as u8);
        buf.put_u16(len as u16);
    } else if u32::try_from(len).is_ok() {
        buf.put_u8(tag32);
        buf.put_u32(len as u32);
    } else {
        return Err(CodecError::Malformed("payload too long for wire format"));
    }
    buf.put_slice(data);
    Ok(())
}

/// Deepest node nesting `decode` follows. The node and content readers
/// recurse into each other, so untrusted depth must be bounded before it
/// becomes stack depth.
const MAX_DEPTH: usize = 128;

struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Decoder<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let byte =
            *self.buf.get(self.pos).ok_or(CodecError::Truncated { needed: 1 })?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_slice(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated { needed: len - self.remaining() });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_node(&mut self) -> Result<Node, CodecError> {
        if self.depth == MAX_DEPTH {
            return Err(CodecError::Malformed("nesting too deep"));
        }
        self.depth += 1;
        let node = self.read_node_inner();
        self.depth -= 1;
        node
    }

    fn read_node_inner(&mut self) -> Result<Node, CodecError> {
        let arity = self.read_list_size()?;
        if arity == 0 {
            return Err(CodecError::Malformed("node cannot be an empty list"));
        }

        let tag = self.read_string()?;
        let has_content = (arity - 1) % 2 == 1;
        let attr_count = (arity - 1 - usize::from(has_content)) / 2;

        let mut attrs = BTreeMap::new();
        for _ in 0..attr_count {
            let key = self.read_string()?;
            let value = self.read_string()?;
            if attrs.insert(key, value).is_some() {
                return Err(CodecError::Malformed("duplicate attribute key"));
            }
        }

        let content = if has_content { self.read_content()? } else { NodeContent::Empty };
        Ok(Node::from_parts(tag, attrs, content))
    }

    /// Read a list header in list position. Non-list tokens are malformed
    /// here; unassigned bytes are unknown tags.
    fn read_list_size(&mut self) -> Result<usize, CodecError> {
        let token = self.read_u8()?;
        let count = match token {
            tokens::LIST_EMPTY => 0,
            tokens::LIST_8 => usize::from(self.read_u8()?),
            tokens::LIST_16 => {
                let bytes = self.read_slice(2)?;
                usize::from(u16::from_be_bytes([bytes[0], bytes[1]]))
            },
            t if is_assigned(t) => {
                return Err(CodecError::Malformed("expected list header"));
            },
            t => return Err(CodecError::UnknownTag(t)),
        };
        // Each list element occupies at least one byte; a count beyond the
        // remaining buffer can never be satisfied, so reject it before any
        // allocation.
        if count > self.remaining() {
            return Err(CodecError::Truncated { needed: count - self.remaining() });
        }
        Ok(count)
    }

    fn read_content(&mut self) -> Result<NodeContent, CodecError> {
        let token = *self.buf.get(self.pos).ok_or(CodecError::Truncated { needed: 1 })?;
        match token {
            tokens::LIST_EMPTY | tokens::LIST_8 | tokens::LIST_16 => {
                let count = self.read_list_size()?;
                let mut children = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    children.push(self.read_node()?);
                }
                Ok(NodeContent::List(children))
            },
            tokens::SINGLE => {
                self.pos += 1;
                Ok(NodeContent::Single(Box::new(self.read_node()?)))
            },
            tokens::BINARY_8 | tokens::BINARY_20 | tokens::BINARY_32 => {
                self.pos += 1;
                let len = self.read_length(token)?;
                let data = self.read_slice(len)?;
                Ok(NodeContent::Binary(Bytes::copy_from_slice(data)))
            },
            _ => Ok(NodeContent::Text(self.read_string()?)),
        }
    }

    fn read_string(&mut self) -> Result<String, CodecError> {
        let token = self.read_u8()?;
        match token {
            t if (tokens::DICT_MIN..=tokens::DICT_MAX).contains(&t) => {
                tokens::string_for(t).map(str::to_string).ok_or(CodecError::UnknownTag(t))
            },
            tokens::TEXT_8 | tokens::TEXT_20 | tokens::TEXT_32 => {
                let len = self.read_length(token)?;
                let bytes = self.read_slice(len)?;
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| CodecError::Malformed("invalid utf-8 in string"))
            },
            tokens::JID_PAIR => {
                let user = self.read_string()?;
                let server = self.read_string()?;
                Ok(Jid::new(user, server).to_string())
            },
            tokens::DEVICE_JID => {
                let agent = self.read_u8()?;
                let device = self.read_u8()?;
                let user = self.read_string()?;
                let server = self.read_string()?;
                Ok(Jid { user, server, device, agent }.to_string())
            },
            t if is_assigned(t) => Err(CodecError::Malformed("expected string element")),
            t => Err(CodecError::UnknownTag(t)),
        }
    }

    /// Read the length field that follows an 8/20/32-bit length tag.
    fn read_length(&mut self, tag: u8) -> Result<usize, CodecError> {
        match tag {
            tokens::TEXT_8 | tokens::BINARY_8 => Ok(usize::from(self.read_u8()?)),
            tokens::TEXT_20 | tokens::BINARY_20 => {
                let bytes = self.read_slice(3)?;
                if bytes[0] & 0xF0 != 0 {
                    return Err(CodecError::Malformed("20-bit length high nibble set"));
                }
                Ok(usize::from(bytes[0]) << 16
                    | usize::from(u16::from_be_bytes([bytes[1], bytes[2]])))
            },
            _ => {
                let bytes = self.read_slice(4)?;
                Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
            },
        }
    }
}

/// Whether a byte has an assignment in the current token contract.
fn is_assigned(token: u8) -> bool {
    match token {
        tokens::LIST_EMPTY | tokens::SINGLE..=u8::MAX => true,
        t if (tokens::DICT_MIN..=tokens::DICT_MAX).contains(&t) => {
            tokens::string_for(t).is_some()
        },
        _ => false,
    }
}
