// ============================================
// File: crates/mcrelay-core/src/protocol/mod.rs
// ============================================
//! # Protocol Module
//!
//! ## Creation Reason
//! Defines the wire protocol the proxy speaks on both legs: frame
//! layout, packet ids, phases and the few typed packets the engine
//! itself needs.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`varint`]: base-128 integer encoding
//! - [`frame`]: length-prefixed frames
//! - [`packet`]: `(id, phase, direction, payload)` model
//! - [`phase`]: per-leg phase state machine
//! - [`payload`]: field readers/writers for handlers
//! - [`login`]: handshake, status and login packet codecs
//!
//! ## Inbound Pipeline
//! ```text
//! bytes ─► cipher ─► frame ─► compression ─► VarInt id + payload ─► Packet
//! ```
//! Outbound runs the same stages in reverse.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Packet ids are only meaningful together with phase and direction
//! - Keep payload interpretation out of this module unless the engine
//!   itself needs the packet to change state
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol definitions

pub mod frame;
pub mod login;
pub mod packet;
pub mod payload;
pub mod phase;
pub mod varint;

// Re-export primary types
pub use frame::{FrameCodec, DEFAULT_MAX_FRAME_LEN};
pub use packet::{encode_body, Packet};
pub use payload::{PayloadReader, PayloadWriter};
pub use phase::{ConnectionState, Phase};
