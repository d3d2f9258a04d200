// ============================================
// File: crates/mcrelay-core/src/lib.rs
// ============================================
//! # mcrelay Core - Wire Protocol Engine
//!
//! ## Creation Reason
//! Provides the byte-level pipeline shared by both legs of a proxied
//! connection: framing, the optional cipher and compression stages, and
//! the phase state machine that decides which packet ids are legal.
//!
//! ## Main Functionality
//!
//! ### Protocol Module ([`protocol`])
//! - VarInt primitives and length-prefixed frames
//! - `Packet` model and payload readers/writers
//! - Phase state machine (Handshaking → Status | Login → Play)
//! - Typed handshake, status and login packets
//!
//! ### Crypto Module ([`crypto`])
//! - AES-128/CFB8 cipher stage keyed by a shared secret
//!
//! ### Compression Module ([`compression`])
//! - zlib stage with a data-length indicator and threshold
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              mcrelay-server                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   mcrelay-core  ◄──     mcrelay-transport           │
//! │   You are here        │                             │
//! │         │             │                             │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             mcrelay-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate performs no I/O, keep it that way
//! - Stage order is fixed: cipher outermost, then frame, then compression
//! - Any framing, cipher or compression error desynchronises the stream
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod compression;
pub mod crypto;
pub mod error;
pub mod protocol;

// Re-export commonly used items
pub use compression::CompressionStage;
pub use crypto::{CipherStage, SharedSecret};
pub use error::{CoreError, Result};
pub use protocol::{
    encode_body, ConnectionState, FrameCodec, Packet, PayloadReader, PayloadWriter, Phase,
    DEFAULT_MAX_FRAME_LEN,
};
