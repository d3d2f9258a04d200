// ============================================
// File: crates/mcrelay-core/src/protocol/frame.rs
// ============================================
//! # Frame Codec
//!
//! ## Creation Reason
//! Splits a byte stream into length-prefixed frames and joins them back.
//! This is the outermost layer of the wire format and knows nothing about
//! packet ids, compression or phases.
//!
//! ## Wire Format
//! ```text
//! ┌──────────────────────┬─────────────────────────────┐
//! │ VarInt frame_length  │ frame_length bytes of body  │
//! └──────────────────────┴─────────────────────────────┘
//! ```
//!
//! ## Main Functionality
//! - `FrameCodec::encode`: prefix a body with its length
//! - `FrameCodec::decode`: pull one complete frame out of a buffer
//!
//! Streaming reads over sockets live in `mcrelay-transport`; they share
//! the limit and the VarInt decoder defined here.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The limit applies in BOTH directions: an oversized outbound body is
//!   rejected before any byte is written
//! - Default limit is 2 097 151, the largest value a 3-byte VarInt holds
//!
//! ## Last Modified
//! v0.1.0 - Initial frame codec

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{CoreError, Result};
use crate::protocol::varint::{peek_varint, put_varint, varint_len};

// ============================================
// Constants
// ============================================

/// Default maximum frame body length.
pub const DEFAULT_MAX_FRAME_LEN: usize = 2_097_151;

// ============================================
// FrameCodec
// ============================================

/// Length-prefix codec with a configured maximum.
///
/// # Example
/// ```
/// use bytes::BytesMut;
/// use mcrelay_core::protocol::frame::FrameCodec;
///
/// let codec = FrameCodec::default();
/// let frame = codec.encode(b"hello").unwrap();
///
/// let mut buf = BytesMut::from(&frame[..]);
/// let body = codec.decode(&mut buf).unwrap().unwrap();
/// assert_eq!(&body[..], b"hello");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_len: usize,
}

impl FrameCodec {
    /// Creates a codec that rejects bodies longer than `max_len`.
    #[must_use]
    pub const fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Returns the configured maximum body length.
    #[must_use]
    pub const fn max_len(&self) -> usize {
        self.max_len
    }

    /// Checks a declared or actual body length against the maximum.
    ///
    /// # Errors
    /// `FramingError::TooLarge` if `len` exceeds the maximum.
    pub fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_len {
            return Err(CoreError::frame_too_large(len, self.max_len));
        }
        Ok(())
    }

    /// Prefixes `body` with its VarInt length.
    ///
    /// # Errors
    /// `FramingError::TooLarge` if `body` exceeds the maximum.
    pub fn encode(&self, body: &[u8]) -> Result<Bytes> {
        self.check_len(body.len())?;
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::frame_too_large(body.len(), self.max_len))?;

        let mut buf = BytesMut::with_capacity(varint_len(len) + body.len());
        put_varint(&mut buf, len);
        buf.extend_from_slice(body);
        Ok(buf.freeze())
    }

    /// Removes one complete frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when more bytes are
    /// needed.
    ///
    /// # Errors
    /// - `FramingError::TooLarge` as soon as the prefix is readable
    /// - `FramingError::VarIntTooLong` for a malformed prefix
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        let Some((len, prefix_len)) = peek_varint(buf)? else {
            return Ok(None);
        };
        let len = len as usize;
        self.check_len(len)?;

        if buf.len() < prefix_len + len {
            return Ok(None);
        }

        buf.advance(prefix_len);
        Ok(Some(buf.split_to(len).freeze()))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FramingError;

    fn roundtrip(codec: &FrameCodec, body: &[u8]) -> Bytes {
        let frame = codec.encode(body).unwrap();
        let mut buf = BytesMut::from(&frame[..]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        decoded
    }

    #[test]
    fn test_roundtrip_boundary_lengths() {
        let codec = FrameCodec::default();
        for len in [0, 1, 127, 128, 16_383, 16_384, DEFAULT_MAX_FRAME_LEN] {
            let body = vec![0xA5u8; len];
            assert_eq!(roundtrip(&codec, &body).len(), len);
        }
    }

    #[test]
    fn test_empty_body_is_single_zero_byte() {
        let codec = FrameCodec::default();
        assert_eq!(codec.encode(&[]).unwrap().as_ref(), &[0x00]);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let codec = FrameCodec::new(16);
        let err = codec.encode(&[0u8; 17]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Framing(FramingError::TooLarge { len: 17, max: 16 })
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_prefix_before_body_arrives() {
        let codec = FrameCodec::new(16);
        // Prefix says 300 bytes, no body yet.
        let mut buf = BytesMut::from(&[0xAC, 0x02][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CoreError::Framing(FramingError::TooLarge { len: 300, .. }))
        ));
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let codec = FrameCodec::default();
        let frame = codec.encode(b"abcdef").unwrap();

        let mut buf = BytesMut::from(&frame[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.extend_from_slice(&frame[3..]);
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"abcdef");
    }

    #[test]
    fn test_decode_back_to_back_frames() {
        let codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&codec.encode(b"one").unwrap());
        buf.extend_from_slice(&codec.encode(b"two").unwrap());

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"two");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
