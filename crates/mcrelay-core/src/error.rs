// ============================================
// File: crates/mcrelay-core/src/error.rs
// ============================================
//! # Core Error Types
//!
//! ## Creation Reason
//! Defines the error types raised by the protocol engine: framing,
//! cipher, compression and phase checks.
//!
//! ## Main Functionality
//! - `CoreError`: Primary error enum for core operations
//! - `FramingError`: Length-prefix and VarInt failures
//! - `CryptoError`: Cipher stage activation failures
//! - `CompressionError`: zlib stage failures
//!
//! ## Error Categories
//! 1. **Leg-fatal**: framing, crypto, compression and phase violations.
//!    The stream can no longer be trusted and the session must close.
//! 2. **Payload**: a single packet's payload did not decode. Callers
//!    decide whether that is fatal.
//!
//! ## ⚠️ Important Note for Next Developer
//! - NEVER include shared secrets in error messages
//! - Error text is shown to players as the disconnect reason, keep it short
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use mcrelay_common::error::CommonError;
use mcrelay_common::Direction;

use crate::protocol::phase::Phase;

// ============================================
// Result Type Alias
// ============================================

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================
// FramingError
// ============================================

/// Errors raised while reading or writing length-prefixed frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Declared frame length exceeds the configured maximum.
    #[error("frame of {len} bytes exceeds maximum of {max}")]
    TooLarge {
        /// Declared or actual length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Stream ended inside a frame.
    #[error("stream closed mid-frame ({context})")]
    Truncated {
        /// Which part of the frame was being read
        context: &'static str,
    },

    /// VarInt used more than five 7-bit groups.
    #[error("VarInt is longer than 5 bytes")]
    VarIntTooLong,
}

// ============================================
// CryptoError
// ============================================

/// Errors raised by the cipher stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// `activate` was called on a leg that is already encrypted.
    #[error("encryption is already active on this leg")]
    AlreadyActive,

    /// Key or IV had the wrong size.
    #[error("invalid {what} length: expected {expected}, got {actual}")]
    InvalidKey {
        /// "key" or "iv"
        what: &'static str,
        /// Required length
        expected: usize,
        /// Supplied length
        actual: usize,
    },
}

// ============================================
// CompressionError
// ============================================

/// Errors raised by the compression stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompressionError {
    /// zlib stream could not be inflated.
    #[error("failed to inflate packet: {0}")]
    Inflate(String),

    /// zlib stream could not be produced.
    #[error("failed to deflate packet: {0}")]
    Deflate(String),

    /// Inflated size disagrees with the declared data length.
    #[error("declared data length {declared} but inflated {actual} bytes")]
    LengthMismatch {
        /// Length from the indicator
        declared: usize,
        /// Bytes actually produced
        actual: usize,
    },

    /// Declared uncompressed length exceeds the frame maximum.
    #[error("declared data length {declared} exceeds maximum of {max}")]
    TooLarge {
        /// Length from the indicator
        declared: usize,
        /// Configured maximum
        max: usize,
    },

    /// Frame body ended before the data-length indicator.
    #[error("missing data length indicator")]
    MissingIndicator,

    /// Zero indicator on a body the sender should have compressed.
    #[error("uncompressed body of {len} bytes at or above threshold {threshold}")]
    UncompressedAboveThreshold {
        /// Body length after the indicator
        len: usize,
        /// Active threshold
        threshold: usize,
    },
}

// ============================================
// CoreError
// ============================================

/// Core error types for the protocol engine.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Framing failure.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Cipher stage failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Compression stage failure.
    #[error("Compression error: {0}")]
    Compression(#[from] CompressionError),

    /// A phase transition target is not a valid successor.
    #[error("Phase violation: cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current phase
        from: Phase,
        /// Requested phase
        to: Phase,
    },

    /// A packet id is not valid for the leg's current phase.
    #[error("Phase violation: packet 0x{id:02x} from {direction} is not valid in {phase}")]
    UnexpectedPacket {
        /// Packet id
        id: u32,
        /// Phase the leg was in
        phase: Phase,
        /// Side that sent it
        direction: Direction,
    },

    /// Packet payload could not be decoded.
    #[error("Malformed packet: {reason}")]
    Malformed {
        /// What's wrong with the payload
        reason: String,
    },

    /// Error from common crate.
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl CoreError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `Malformed` error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Creates a `Truncated` framing error.
    #[must_use]
    pub const fn truncated(context: &'static str) -> Self {
        Self::Framing(FramingError::Truncated { context })
    }

    /// Creates a `TooLarge` framing error.
    #[must_use]
    pub const fn frame_too_large(len: usize, max: usize) -> Self {
        Self::Framing(FramingError::TooLarge { len, max })
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this is a phase violation.
    #[must_use]
    pub const fn is_phase_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. } | Self::UnexpectedPacket { .. }
        )
    }

    /// Returns `true` if the leg that produced this error must be closed.
    ///
    /// Once a framing, cipher or compression step fails the byte stream
    /// is desynchronised and nothing after it can be parsed.
    #[must_use]
    pub const fn is_fatal_to_leg(&self) -> bool {
        matches!(
            self,
            Self::Framing(_)
                | Self::Crypto(_)
                | Self::Compression(_)
                | Self::InvalidTransition { .. }
                | Self::UnexpectedPacket { .. }
        )
    }
}

// ============================================
// Tests
// ============================================
