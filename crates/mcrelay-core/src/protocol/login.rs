// ============================================
// File: crates/mcrelay-core/src/protocol/login.rs
// ============================================
//! # Handshake, Status and Login Packets
//!
//! ## Creation Reason
//! The engine treats payloads as opaque, except for the few packets
//! that drive phase transitions, encryption and compression. Those are
//! decoded here so the proxy and backend-login code share one definition.
//!
//! ## Packet Map (protocol 47)
//! ```text
//! Handshaking  C→S 0x00 Handshake
//! Status       C→S 0x00 Request        S→C 0x00 Response (JSON)
//!              C→S 0x01 Ping           S→C 0x01 Pong
//! Login        C→S 0x00 LoginStart     S→C 0x00 Disconnect (JSON)
//!              C→S 0x01 EncResponse    S→C 0x01 EncRequest
//!                                      S→C 0x02 LoginSuccess
//!                                      S→C 0x03 SetCompression
//! Play         C→S 0x00 KeepAlive      S→C 0x00 KeepAlive
//!                                      S→C 0x40 Disconnect (JSON)
//!                                      S→C 0x46 SetCompression
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial login packet codecs

use bytes::Bytes;
use serde_json::json;

use crate::error::{CoreError, Result};
use crate::protocol::payload::{PayloadReader, PayloadWriter};
use crate::protocol::phase::Phase;

// ============================================
// Packet Ids
// ============================================

/// Protocol version spoken by default (1.8.x).
pub const PROTOCOL_VERSION: i32 = 47;

/// Packet ids grouped by phase and sender.
pub mod ids {
    /// Client → server, Handshaking.
    pub const HANDSHAKE: u32 = 0x00;

    /// Client → server, Status.
    pub const STATUS_REQUEST: u32 = 0x00;
    /// Client → server, Status.
    pub const STATUS_PING: u32 = 0x01;
    /// Server → client, Status.
    pub const STATUS_RESPONSE: u32 = 0x00;
    /// Server → client, Status.
    pub const STATUS_PONG: u32 = 0x01;

    /// Client → server, Login.
    pub const LOGIN_START: u32 = 0x00;
    /// Client → server, Login.
    pub const ENCRYPTION_RESPONSE: u32 = 0x01;
    /// Server → client, Login.
    pub const LOGIN_DISCONNECT: u32 = 0x00;
    /// Server → client, Login.
    pub const ENCRYPTION_REQUEST: u32 = 0x01;
    /// Server → client, Login.
    pub const LOGIN_SUCCESS: u32 = 0x02;
    /// Server → client, Login.
    pub const SET_COMPRESSION: u32 = 0x03;

    /// Both directions, Play.
    pub const KEEP_ALIVE: u32 = 0x00;
    /// Server → client, Play.
    pub const PLAY_DISCONNECT: u32 = 0x40;
    /// Server → client, Play.
    pub const PLAY_SET_COMPRESSION: u32 = 0x46;
}

// ============================================
// Handshake
// ============================================

/// First packet on every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Client protocol version.
    pub protocol_version: i32,
    /// Host name the client typed (or the spoofed one).
    pub server_address: String,
    /// Port the client typed (or the spoofed one).
    pub server_port: u16,
    /// Requested phase.
    pub next_phase: Phase,
}

impl Handshake {
    /// Decodes a handshake payload.
    ///
    /// # Errors
    /// `CoreError::Malformed` for short payloads or an unknown next state.
    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut reader = PayloadReader::new(payload);
        let protocol_version = reader.varint_i32()?;
        let server_address = reader.string()?;
        let server_port = reader.u16()?;
        let next_state = reader.varint_i32()?;
        let next_phase = Phase::from_next_state(next_state)
            .ok_or_else(|| CoreError::malformed(format!("unknown next state {next_state}")))?;

        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_phase,
        })
    }

    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let next_state = match self.next_phase {
            Phase::Status => 1,
            _ => 2,
        };
        PayloadWriter::new()
            .varint_i32(self.protocol_version)
            .string(&self.server_address)
            .u16(self.server_port)
            .varint_i32(next_state)
            .finish()
    }
}

// ============================================
// LoginStart
// ============================================

/// Client's first Login packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStart {
    /// Player name.
    pub username: String,
}

impl LoginStart {
    /// Decodes a login start payload.
    ///
    /// # Errors
    /// `CoreError::Malformed` if the name is missing.
    pub fn decode(payload: Bytes) -> Result<Self> {
        let username = PayloadReader::new(payload).string()?;
        Ok(Self { username })
    }

    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PayloadWriter::new().string(&self.username).finish()
    }
}

// ============================================
// EncryptionRequest / EncryptionResponse
// ============================================

/// Server's request to switch the connection to AES/CFB8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    /// Server id string (usually empty).
    pub server_id: String,
    /// DER-encoded RSA public key.
    pub public_key: Bytes,
    /// Token the client must echo back encrypted.
    pub verify_token: Bytes,
}

impl EncryptionRequest {
    /// Decodes an encryption request payload.
    ///
    /// # Errors
    /// `CoreError::Malformed` for short payloads.
    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut reader = PayloadReader::new(payload);
        Ok(Self {
            server_id: reader.string()?,
            public_key: reader.byte_array()?,
            verify_token: reader.byte_array()?,
        })
    }

    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PayloadWriter::new()
            .string(&self.server_id)
            .byte_array(&self.public_key)
            .byte_array(&self.verify_token)
            .finish()
    }
}

/// Client's answer to an [`EncryptionRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionResponse {
    /// Shared secret, RSA-encrypted with the server key.
    pub encrypted_secret: Bytes,
    /// Verify token, RSA-encrypted with the server key.
    pub encrypted_verify_token: Bytes,
}

impl EncryptionResponse {
    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PayloadWriter::new()
            .byte_array(&self.encrypted_secret)
            .byte_array(&self.encrypted_verify_token)
            .finish()
    }
}

// ============================================
// SetCompression / LoginSuccess
// ============================================

/// Decodes a SetCompression payload (Login 0x03 or Play 0x46).
///
/// # Errors
/// `CoreError::Malformed` if the threshold is missing.
pub fn decode_set_compression(payload: Bytes) -> Result<i32> {
    PayloadReader::new(payload).varint_i32()
}

/// Encodes a SetCompression payload.
#[must_use]
pub fn encode_set_compression(threshold: i32) -> Bytes {
    PayloadWriter::new().varint_i32(threshold).finish()
}

/// Server's final Login packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSuccess {
    /// Hyphenated UUID string.
    pub uuid: String,
    /// Player name as the server knows it.
    pub username: String,
}

impl LoginSuccess {
    /// Decodes a login success payload.
    ///
    /// # Errors
    /// `CoreError::Malformed` for short payloads.
    pub fn decode(payload: Bytes) -> Result<Self> {
        let mut reader = PayloadReader::new(payload);
        Ok(Self {
            uuid: reader.string()?,
            username: reader.string()?,
        })
    }

    /// Encodes the payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PayloadWriter::new()
            .string(&self.uuid)
            .string(&self.username)
            .finish()
    }
}

// ============================================
// Disconnect / chat text
// ============================================

/// Builds a JSON text component with a single `text` field.
#[must_use]
pub fn text_component(text: &str) -> String {
    json!({ "text": text }).to_string()
}

/// Builds the disconnect packet appropriate for `phase`.
///
/// Returns `None` for phases without a disconnect packet
/// (Handshaking, Status).
#[must_use]
pub fn disconnect_packet(phase: Phase, reason: &str) -> Option<(u32, Bytes)> {
    let id = match phase {
        Phase::Login => ids::LOGIN_DISCONNECT,
        Phase::Play => ids::PLAY_DISCONNECT,
        Phase::Handshaking | Phase::Status => return None,
    };
    let payload = PayloadWriter::new().string(&text_component(reason)).finish();
    Some((id, payload))
}

/// Reads the JSON reason out of a disconnect payload.
///
/// # Errors
/// `CoreError::Malformed` if the payload is not a string field.
pub fn decode_disconnect(payload: Bytes) -> Result<String> {
    PayloadReader::new(payload).string()
}

// ============================================
// Tests
// ============================================
