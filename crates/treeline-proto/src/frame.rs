//! Frame delimiting for the byte stream.
//!
//! Each frame is a 3-byte big-endian length prefix followed by an opaque
//! payload: a plaintext handshake message before session keys exist, a
//! ciphertext afterwards. Framing is a transport concern; nothing in here
//! looks inside the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::errors::FrameError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 3;

/// Largest payload the 3-byte prefix can describe (just under 16 MB).
///
/// This doubles as the memory-exhaustion bound for inbound frames.
pub const MAX_FRAME_LEN: usize = 0x00FF_FFFF;

/// Append one length-prefixed frame to `dst`.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::Oversized { len: payload.len(), max: MAX_FRAME_LEN });
    }
    dst.reserve(LENGTH_PREFIX + payload.len());
    dst.put_u8((payload.len() >> 16) as u8);
    dst.put_u16(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Accumulates stream bytes and yields whole frame payloads.
///
/// Feed raw reads with [`FrameBuffer::extend`], then drain complete frames
/// with [`FrameBuffer::next_frame`] until it returns `None`. Partial frames
/// stay buffered across reads.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    /// An empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame payload, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if self.buf.len() < LENGTH_PREFIX {
            return None;
        }
        let len = usize::from(self.buf[0]) << 16
            | usize::from(u16::from_be_bytes([self.buf[1], self.buf[2]]));
        if self.buf.len() < LENGTH_PREFIX + len {
            return None;
        }
        self.buf.advance(LENGTH_PREFIX);
        Some(self.buf.split_to(len).freeze())
    }

    /// Bytes currently buffered (diagnostics).
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_buffer() {
        let mut wire = BytesMut::new();
        encode_frame(b"hello", &mut wire).unwrap();
        encode_frame(b"", &mut wire).unwrap();
        encode_frame(&[0xAB; 300], &mut wire).unwrap();

        let mut buffer = FrameBuffer::new();
        buffer.extend(&wire);
        assert_eq!(buffer.next_frame().unwrap().as_ref(), b"hello");
        assert_eq!(buffer.next_frame().unwrap().as_ref(), b"");
        assert_eq!(buffer.next_frame().unwrap().as_ref(), &[0xAB; 300][..]);
        assert!(buffer.next_frame().is_none());
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn partial_frames_stay_buffered() {
        let mut wire = BytesMut::new();
        encode_frame(b"split me", &mut wire).unwrap();

        let mut buffer = FrameBuffer::new();
        // Feed byte by byte; only the final byte completes the frame.
        for (i, byte) in wire.iter().enumerate() {
            buffer.extend(&[*byte]);
            if i + 1 < wire.len() {
                assert!(buffer.next_frame().is_none());
            }
        }
        assert_eq!(buffer.next_frame().unwrap().as_ref(), b"split me");
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut wire = BytesMut::new();
        let huge = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            encode_frame(&huge, &mut wire),
            Err(FrameError::Oversized { .. })
        ));
    }
}
