// ============================================
// File: crates/mcrelay-core/src/compression.rs
// ============================================
//! # Compression Stage
//!
//! ## Creation Reason
//! Once a server sends SetCompression every frame body on that leg
//! carries a data-length indicator and, above the threshold, a zlib
//! stream.
//!
//! ## Body Layout (enabled)
//! ```text
//! ┌──────────────────────┬──────────────────────────────────┐
//! │ VarInt data_length   │ zlib(id + payload)   if len > 0  │
//! │                      │ id + payload         if len == 0 │
//! └──────────────────────┴──────────────────────────────────┘
//! ```
//! Bodies of `threshold` bytes or more are compressed, smaller ones are
//! sent raw behind a zero indicator.
//!
//! ## ⚠️ Important Note for Next Developer
//! - A negative threshold disables the stage entirely (no indicator)
//! - The declared length is checked against the frame maximum BEFORE
//!   inflating, a hostile peer can otherwise ask for gigabytes
//!
//! ## Last Modified
//! v0.1.0 - Initial zlib stage

use std::io::{Read, Write};

use bytes::{Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{CompressionError, Result};
use crate::protocol::frame::DEFAULT_MAX_FRAME_LEN;
use crate::protocol::varint::{get_varint, put_varint, varint_len};

/// Threshold value meaning "compression disabled".
pub const DISABLED: i32 = -1;

// ============================================
// CompressionStage
// ============================================

/// Per-leg compression state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStage {
    threshold: i32,
    max_len: usize,
}

impl CompressionStage {
    /// Creates a disabled stage that rejects inflated bodies above `max_len`.
    #[must_use]
    pub const fn new(max_len: usize) -> Self {
        Self {
            threshold: DISABLED,
            max_len,
        }
    }

    /// Creates a disabled stage with the default frame maximum.
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }

    /// Applies a SetCompression threshold. Negative disables.
    pub fn set_threshold(&mut self, threshold: i32) {
        self.threshold = if threshold < 0 { DISABLED } else { threshold };
    }

    /// Current threshold (`-1` when disabled).
    #[must_use]
    pub const fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Returns `true` if bodies carry a data-length indicator.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.threshold >= 0
    }

    /// Wraps an uncompressed body for the wire.
    ///
    /// # Errors
    /// `CompressionError::Deflate` if zlib fails.
    pub fn encode(&self, body: &[u8]) -> Result<Bytes> {
        if !self.is_enabled() {
            return Ok(Bytes::copy_from_slice(body));
        }

        #[allow(clippy::cast_sign_loss)]
        let threshold = self.threshold as usize;
        if body.len() < threshold {
            let mut buf = BytesMut::with_capacity(1 + body.len());
            put_varint(&mut buf, 0);
            buf.extend_from_slice(body);
            return Ok(buf.freeze());
        }

        let declared = u32::try_from(body.len())
            .map_err(|_| CompressionError::Deflate("body length exceeds u32".into()))?;
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
        encoder
            .write_all(body)
            .map_err(|e| CompressionError::Deflate(e.to_string()))?;
        let deflated = encoder
            .finish()
            .map_err(|e| CompressionError::Deflate(e.to_string()))?;

        let mut buf = BytesMut::with_capacity(varint_len(declared) + deflated.len());
        put_varint(&mut buf, declared);
        buf.extend_from_slice(&deflated);
        Ok(buf.freeze())
    }

    /// Unwraps a wire body into the uncompressed `id + payload`.
    ///
    /// # Errors
    /// - `CompressionError::MissingIndicator` for an empty body
    /// - `CompressionError::UncompressedAboveThreshold` for a zero indicator
    ///   on a body at or above the threshold
    /// - `CompressionError::TooLarge` if the declared length exceeds the maximum
    /// - `CompressionError::Inflate` / `LengthMismatch` for a bad zlib stream
    pub fn decode(&self, body: Bytes) -> Result<Bytes> {
        if !self.is_enabled() {
            return Ok(body);
        }
        if body.is_empty() {
            return Err(CompressionError::MissingIndicator.into());
        }

        let mut body = body;
        let declared = get_varint(&mut body)? as usize;
        if declared == 0 {
            #[allow(clippy::cast_sign_loss)]
            let threshold = self.threshold as usize;
            if body.len() >= threshold {
                return Err(CompressionError::UncompressedAboveThreshold {
                    len: body.len(),
                    threshold,
                }
                .into());
            }
            return Ok(body);
        }
        if declared > self.max_len {
            return Err(CompressionError::TooLarge {
                declared,
                max: self.max_len,
            }
            .into());
        }

        let mut inflated = Vec::with_capacity(declared);
        // Read one byte past the declared length so an over-long stream is caught.
        let limit = declared as u64 + 1;
        ZlibDecoder::new(body.as_ref())
            .take(limit)
            .read_to_end(&mut inflated)
            .map_err(|e| CompressionError::Inflate(e.to_string()))?;

        if inflated.len() != declared {
            return Err(CompressionError::LengthMismatch {
                declared,
                actual: inflated.len(),
            }
            .into());
        }
        Ok(Bytes::from(inflated))
    }
}

impl Default for CompressionStage {
    fn default() -> Self {
        Self::disabled()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    fn enabled(threshold: i32) -> CompressionStage {
        let mut stage = CompressionStage::disabled();
        stage.set_threshold(threshold);
        stage
    }

    #[test]
    fn test_disabled_is_passthrough() {
        let stage = CompressionStage::disabled();
        assert!(!stage.is_enabled());
        let wire = stage.encode(b"\x00abc").unwrap();
        assert_eq!(wire.as_ref(), b"\x00abc");
        assert_eq!(stage.decode(wire).unwrap().as_ref(), b"\x00abc");
    }

    #[test]
    fn test_below_threshold_has_zero_indicator() {
        let stage = enabled(256);
        let wire = stage.encode(&[0x01, 0x02]).unwrap();
        assert_eq!(wire.as_ref(), &[0x00, 0x01, 0x02]);
        assert_eq!(stage.decode(wire).unwrap().as_ref(), &[0x01, 0x02]);
    }

    #[test]
    fn test_at_threshold_is_compressed() {
        let stage = enabled(64);
        let body = vec![0x41u8; 64];
        let wire = stage.encode(&body).unwrap();

        // Indicator is the uncompressed length.
        assert_eq!(wire[0], 64);
        assert!(wire.len() < body.len());
        assert_eq!(stage.decode(wire).unwrap().as_ref(), body.as_slice());
    }

    #[test]
    fn test_zero_threshold_compresses_everything() {
        let stage = enabled(0);
        let wire = stage.encode(&[0x07]).unwrap();
        assert_eq!(wire[0], 1);
        assert_eq!(stage.decode(wire).unwrap().as_ref(), &[0x07]);
    }

    #[test]
    fn test_negative_threshold_disables() {
        let mut stage = enabled(128);
        stage.set_threshold(-5);
        assert_eq!(stage.threshold(), DISABLED);
        assert!(!stage.is_enabled());
    }

    #[test]
    fn test_declared_length_too_large() {
        let stage = CompressionStage::new(100);
        let mut stage = stage;
        stage.set_threshold(0);

        let mut wire = BytesMut::new();
        put_varint(&mut wire, 1_000);
        wire.extend_from_slice(&[0x78, 0x9C]);

        let err = stage.decode(wire.freeze()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Compression(CompressionError::TooLarge { declared: 1_000, max: 100 })
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let sender = enabled(0);
        let wire = sender.encode(b"hello world").unwrap();

        // Lie about the uncompressed length.
        let mut forged = BytesMut::new();
        put_varint(&mut forged, 5);
        forged.extend_from_slice(&wire[1..]);

        let err = sender.decode(forged.freeze()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Compression(CompressionError::LengthMismatch { declared: 5, .. })
        ));
    }

    #[test]
    fn test_garbage_stream() {
        let stage = enabled(0);
        let err = stage
            .decode(Bytes::from_static(&[0x10, 0xDE, 0xAD, 0xBE, 0xEF]))
            .unwrap_err();
        assert!(matches!(err, CoreError::Compression(_)));
    }

    #[test]
    fn test_zero_indicator_at_threshold_rejected() {
        let stage = enabled(4);

        // Three bytes is below the threshold and passes through.
        assert_eq!(
            stage.decode(Bytes::from_static(&[0x00, 0x01, 0x02, 0x03])).unwrap().as_ref(),
            &[0x01, 0x02, 0x03]
        );

        let err = stage
            .decode(Bytes::from_static(&[0x00, 0x01, 0x02, 0x03, 0x04]))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Compression(CompressionError::UncompressedAboveThreshold {
                len: 4,
                threshold: 4
            })
        ));

        // With threshold 0 every body must be compressed.
        let err = enabled(0)
            .decode(Bytes::from_static(&[0x00, 0x07]))
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Compression(CompressionError::UncompressedAboveThreshold { .. })
        ));
    }

    #[test]
    fn test_empty_body_missing_indicator() {
        let stage = enabled(0);
        let err = stage.decode(Bytes::new()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Compression(CompressionError::MissingIndicator)
        ));
    }
}
