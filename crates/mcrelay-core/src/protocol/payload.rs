// ============================================
// File: crates/mcrelay-core/src/protocol/payload.rs
// ============================================
//! # Payload Field Helpers
//!
//! ## Creation Reason
//! Payloads are opaque to the engine, but handlers and the built-in
//! login flow need to read and write a handful of primitive fields.
//! These helpers cover the field types those packets use.
//!
//! ## Field Encodings
//! - VarInt: see [`super::varint`]
//! - String: VarInt byte length, then UTF-8
//! - Byte array: VarInt length, then raw bytes
//! - Fixed-width integers: big-endian
//!
//! ## Last Modified
//! v0.1.0 - Initial payload helpers

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{CoreError, Result};
use crate::protocol::varint::{get_varint, get_varint_i32, put_varint, put_varint_i32};

/// Longest string (in characters) the protocol allows in any field.
pub const MAX_STRING_CHARS: usize = 32_767;

// ============================================
// PayloadReader
// ============================================

/// Cursor over a packet payload.
///
/// # Example
/// ```
/// use mcrelay_core::protocol::payload::{PayloadReader, PayloadWriter};
///
/// let payload = PayloadWriter::new().string("Notch").u16(25565).finish();
/// let mut reader = PayloadReader::new(payload);
/// assert_eq!(reader.string().unwrap(), "Notch");
/// assert_eq!(reader.u16().unwrap(), 25565);
/// ```
#[derive(Debug, Clone)]
pub struct PayloadReader {
    buf: Bytes,
}

impl PayloadReader {
    /// Wraps a payload.
    #[must_use]
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize, field: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(CoreError::malformed(format!(
                "{field}: need {n} bytes, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Reads an unsigned VarInt.
    ///
    /// # Errors
    /// `CoreError::Malformed` if the payload ends early.
    pub fn varint(&mut self) -> Result<u32> {
        get_varint(&mut self.buf)
    }

    /// Reads a signed VarInt.
    ///
    /// # Errors
    /// `CoreError::Malformed` if the payload ends early.
    pub fn varint_i32(&mut self) -> Result<i32> {
        get_varint_i32(&mut self.buf)
    }

    /// Reads a length-prefixed UTF-8 string.
    ///
    /// # Errors
    /// `CoreError::Malformed` for a short buffer, an over-long string or
    /// invalid UTF-8.
    pub fn string(&mut self) -> Result<String> {
        let len = self.varint()? as usize;
        if len > MAX_STRING_CHARS * 4 {
            return Err(CoreError::malformed(format!("string of {len} bytes is too long")));
        }
        self.need(len, "string")?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|e| CoreError::malformed(format!("string is not UTF-8: {e}")))
    }

    /// Reads a VarInt-prefixed byte array.
    ///
    /// # Errors
    /// `CoreError::Malformed` if the payload ends early.
    pub fn byte_array(&mut self) -> Result<Bytes> {
        let len = self.varint()? as usize;
        self.need(len, "byte array")?;
        Ok(self.buf.split_to(len))
    }

    /// Reads a big-endian `u16`.
    ///
    /// # Errors
    /// `CoreError::Malformed` if the payload ends early.
    pub fn u16(&mut self) -> Result<u16> {
        self.need(2, "u16")?;
        Ok(self.buf.get_u16())
    }

    /// Reads a big-endian `i32`.
    ///
    /// # Errors
    /// `CoreError::Malformed` if the payload ends early.
    pub fn i32(&mut self) -> Result<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    /// Reads a big-endian `i64`.
    ///
    /// # Errors
    /// `CoreError::Malformed` if the payload ends early.
    pub fn i64(&mut self) -> Result<i64> {
        self.need(8, "i64")?;
        Ok(self.buf.get_i64())
    }

    /// Returns the unread remainder.
    #[must_use]
    pub fn rest(self) -> Bytes {
        self.buf
    }

    /// Returns the number of unread bytes.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}

// ============================================
// PayloadWriter
// ============================================

/// Builder for packet payloads.
#[derive(Debug, Default, Clone)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    /// Creates an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an unsigned VarInt.
    #[must_use]
    pub fn varint(mut self, value: u32) -> Self {
        put_varint(&mut self.buf, value);
        self
    }

    /// Appends a signed VarInt.
    #[must_use]
    pub fn varint_i32(mut self, value: i32) -> Self {
        put_varint_i32(&mut self.buf, value);
        self
    }

    /// Appends a length-prefixed UTF-8 string.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn string(mut self, value: &str) -> Self {
        put_varint(&mut self.buf, value.len() as u32);
        self.buf.put_slice(value.as_bytes());
        self
    }

    /// Appends a VarInt-prefixed byte array.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn byte_array(mut self, value: &[u8]) -> Self {
        put_varint(&mut self.buf, value.len() as u32);
        self.buf.put_slice(value);
        self
    }

    /// Appends a big-endian `u16`.
    #[must_use]
    pub fn u16(mut self, value: u16) -> Self {
        self.buf.put_u16(value);
        self
    }

    /// Appends a big-endian `i64`.
    #[must_use]
    pub fn i64(mut self, value: i64) -> Self {
        self.buf.put_i64(value);
        self
    }

    /// Appends raw bytes.
    #[must_use]
    pub fn raw(mut self, value: &[u8]) -> Self {
        self.buf.put_slice(value);
        self
    }

    /// Finishes the payload.
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_fields() {
        let payload = PayloadWriter::new()
            .varint(47)
            .string("mc.hypixel.net")
            .u16(25565)
            .varint(2)
            .finish();

        let mut reader = PayloadReader::new(payload);
        assert_eq!(reader.varint().unwrap(), 47);
        assert_eq!(reader.string().unwrap(), "mc.hypixel.net");
        assert_eq!(reader.u16().unwrap(), 25565);
        assert_eq!(reader.varint().unwrap(), 2);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_string_length_counts_bytes_not_chars() {
        let payload = PayloadWriter::new().string("§a").finish();
        // '§' is two bytes in UTF-8
        assert_eq!(payload[0], 3);
        assert_eq!(PayloadReader::new(payload).string().unwrap(), "§a");
    }

    #[test]
    fn test_short_buffer_is_malformed() {
        let mut reader = PayloadReader::new(Bytes::from_static(&[0x05, b'a', b'b']));
        assert!(matches!(reader.string(), Err(CoreError::Malformed { .. })));

        let mut reader = PayloadReader::new(Bytes::from_static(&[0x01]));
        assert!(reader.u16().is_err());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut reader = PayloadReader::new(Bytes::from_static(&[0x02, 0xC3, 0x28]));
        assert!(reader.string().is_err());
    }

    #[test]
    fn test_rest_returns_unread_bytes() {
        let mut reader = PayloadReader::new(Bytes::from_static(&[0x01, 0xAA, 0xBB]));
        assert_eq!(reader.varint().unwrap(), 1);
        assert_eq!(reader.rest().as_ref(), &[0xAA, 0xBB]);
    }
}
