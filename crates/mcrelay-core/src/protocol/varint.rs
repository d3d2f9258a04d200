// ============================================
// File: crates/mcrelay-core/src/protocol/varint.rs
// ============================================
//! # VarInt Encoding
//!
//! ## Creation Reason
//! Every frame length, packet id and most integer fields on the wire use
//! the base-128 "VarInt" encoding. This module is the single place that
//! knows how it works.
//!
//! ## Wire Format
//! ```text
//!   value = 300 (0b1_0010_1100)
//!
//!   ┌──────────┬──────────┐
//!   │ 10101100 │ 00000010 │   low 7 bits first, high bit = "more follows"
//!   └──────────┴──────────┘
//! ```
//! At most five groups: 5 × 7 = 35 bits covers a full 32-bit value.
//! Negative `i32` values are written as their two's-complement `u32`
//! and therefore always take five bytes.
//!
//! ## Main Functionality
//! - `put_varint` / `get_varint`: buffer encode/decode
//! - `varint_len`: encoded size without encoding
//! - `VarIntDecoder`: byte-at-a-time decoder for streaming readers
//!
//! ## Last Modified
//! v0.1.0 - Initial VarInt implementation

use bytes::{Buf, BufMut};

use crate::error::{CoreError, FramingError, Result};

// ============================================
// Constants
// ============================================

/// Maximum encoded size of a VarInt in bytes.
pub const MAX_VARINT_LEN: usize = 5;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

// ============================================
// Encoding
// ============================================

/// Appends `value` to `buf` as a VarInt.
pub fn put_varint(buf: &mut impl BufMut, value: u32) {
    let mut value = value;
    loop {
        // Truncation is the point: keep the low 7 bits.
        #[allow(clippy::cast_possible_truncation)]
        let segment = (value as u8) & SEGMENT_BITS;
        value >>= 7;
        if value == 0 {
            buf.put_u8(segment);
            return;
        }
        buf.put_u8(segment | CONTINUE_BIT);
    }
}

/// Appends a signed protocol integer as a VarInt.
#[allow(clippy::cast_sign_loss)]
pub fn put_varint_i32(buf: &mut impl BufMut, value: i32) {
    put_varint(buf, value as u32);
}

/// Returns the number of bytes `value` occupies once encoded.
#[must_use]
pub const fn varint_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x001F_FFFF => 3,
        0x0020_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

// ============================================
// Decoding
// ============================================

/// Incremental VarInt decoder.
///
/// Streaming readers feed bytes one at a time and stop as soon as a
/// value is complete, so no byte past the VarInt is ever consumed.
///
/// # Example
/// ```
/// use mcrelay_core::protocol::varint::VarIntDecoder;
///
/// let mut decoder = VarIntDecoder::new();
/// assert_eq!(decoder.push(0xAC).unwrap(), None);
/// assert_eq!(decoder.push(0x02).unwrap(), Some(300));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct VarIntDecoder {
    value: u32,
    consumed: usize,
}

impl VarIntDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: 0,
            consumed: 0,
        }
    }

    /// Feeds one byte.
    ///
    /// Returns `Ok(Some(value))` once the final group has been seen.
    ///
    /// # Errors
    /// `FramingError::VarIntTooLong` when a sixth byte would be needed.
    pub fn push(&mut self, byte: u8) -> Result<Option<u32>> {
        if self.consumed >= MAX_VARINT_LEN {
            return Err(FramingError::VarIntTooLong.into());
        }

        self.value |= u32::from(byte & SEGMENT_BITS) << (7 * self.consumed);
        self.consumed += 1;

        if byte & CONTINUE_BIT == 0 {
            return Ok(Some(self.value));
        }
        if self.consumed == MAX_VARINT_LEN {
            return Err(FramingError::VarIntTooLong.into());
        }
        Ok(None)
    }

    /// Returns how many bytes have been fed so far.
    #[must_use]
    pub const fn consumed(&self) -> usize {
        self.consumed
    }
}

/// Reads a VarInt from the front of `buf`.
///
/// # Errors
/// - `FramingError::VarIntTooLong` for more than five groups
/// - `CoreError::Malformed` if `buf` ends inside the VarInt
pub fn get_varint(buf: &mut impl Buf) -> Result<u32> {
    let mut decoder = VarIntDecoder::new();
    while buf.has_remaining() {
        if let Some(value) = decoder.push(buf.get_u8())? {
            return Ok(value);
        }
    }
    Err(CoreError::malformed("buffer ended inside a VarInt"))
}

/// Reads a signed protocol integer encoded as a VarInt.
///
/// # Errors
/// Same as [`get_varint`].
#[allow(clippy::cast_possible_wrap)]
pub fn get_varint_i32(buf: &mut impl Buf) -> Result<i32> {
    get_varint(buf).map(|v| v as i32)
}

/// Tries to read a VarInt without consuming `buf`.
///
/// Returns `Ok(None)` when `buf` holds an incomplete VarInt, otherwise
/// the value and its encoded length.
///
/// # Errors
/// `FramingError::VarIntTooLong` for more than five groups.
pub fn peek_varint(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut decoder = VarIntDecoder::new();
    for &byte in buf {
        if let Some(value) = decoder.push(byte)? {
            return Ok(Some((value, decoder.consumed())));
        }
    }
    Ok(None)
}

// ============================================
// Tests
// ============================================
