// ============================================
// File: crates/mcrelay-core/src/protocol/packet.rs
// ============================================
//! # Packet
//!
//! ## Creation Reason
//! A decoded frame body is a VarInt packet id followed by an opaque
//! payload. `Packet` pairs that with the phase and direction it arrived
//! in, which together form the dispatch key.
//!
//! ## Body Layout
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ VarInt packet_id │ payload (opaque bytes)   │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial packet model

use bytes::{Bytes, BytesMut};

use mcrelay_common::Direction;

use crate::error::Result;
use crate::protocol::phase::Phase;
use crate::protocol::varint::{get_varint, put_varint, varint_len};

// ============================================
// Packet
// ============================================

/// One decoded packet.
///
/// `payload` is a cheap `Bytes` handle, cloning a `Packet` never copies
/// the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet id, interpreted relative to `phase` and `direction`.
    pub id: u32,
    /// Phase of the receiving leg when the packet was read.
    pub phase: Phase,
    /// Side that sent the packet.
    pub direction: Direction,
    /// Everything after the id.
    pub payload: Bytes,
}

impl Packet {
    /// Creates a packet.
    #[must_use]
    pub const fn new(id: u32, phase: Phase, direction: Direction, payload: Bytes) -> Self {
        Self {
            id,
            phase,
            direction,
            payload,
        }
    }

    /// Splits an uncompressed frame body into id and payload.
    ///
    /// # Errors
    /// `CoreError::Malformed` if the body does not start with a VarInt.
    pub fn parse(body: Bytes, phase: Phase, direction: Direction) -> Result<Self> {
        let mut body = body;
        let id = get_varint(&mut body)?;
        Ok(Self::new(id, phase, direction, body))
    }

    /// Re-assembles the uncompressed frame body.
    #[must_use]
    pub fn body(&self) -> Bytes {
        encode_body(self.id, &self.payload)
    }
}

/// Builds an uncompressed frame body from an id and payload.
#[must_use]
pub fn encode_body(id: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(varint_len(id) + payload.len());
    put_varint(&mut buf, id);
    buf.extend_from_slice(payload);
    buf.freeze()
}

// ============================================
// Tests
// ============================================
