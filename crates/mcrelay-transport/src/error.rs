// ============================================
// File: crates/mcrelay-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! Defines error types for stream transport: binding the client
//! listener, dialing backends, and moving framed packets over a leg.
//!
//! ## Main Functionality
//! - `TransportError`: Primary error enum for transport operations
//! - Error conversion from system and protocol errors
//! - Categorization of retryable vs leg-fatal errors
//!
//! ## Error Categories
//! 1. **Network Errors**: bind and connect failures
//! 2. **Leg Errors**: I/O on an open leg, leg already closed
//! 3. **Protocol Errors**: framing, cipher and compression failures
//!    raised while decoding the stream (wrapped `CoreError`)
//!
//! ## ⚠️ Important Note for Next Developer
//! - Connect failures are recoverable for `transfer_to`/`spawn_peer`
//! - Any error from a leg read means the leg is unusable
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use mcrelay_core::error::CoreError;

// ============================================
// Result Type Alias
// ============================================

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

// ============================================
// TransportError
// ============================================

/// Transport layer error types.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Network Errors
    // ========================================

    /// Failed to bind to address.
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed {
        /// Address we tried to bind to
        addr: SocketAddr,
        /// Why binding failed
        reason: String,
    },

    /// Address already in use.
    #[error("Address {addr} already in use")]
    AddressInUse {
        /// The address that's in use
        addr: SocketAddr,
    },

    /// Failed to open a connection to a backend.
    #[error("Failed to connect to {addr}: {reason}")]
    ConnectFailed {
        /// Backend we tried to reach
        addr: String,
        /// Why the connection failed
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// What operation timed out
        operation: String,
    },

    // ========================================
    // Leg Errors
    // ========================================

    /// Write attempted on a leg that has been shut down.
    #[error("Leg to {peer} is closed")]
    LegClosed {
        /// Peer label of the leg
        peer: String,
    },

    /// I/O error from the system.
    #[error("I/O error: {context}")]
    Io {
        /// What was happening when the error occurred
        context: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    // ========================================
    // Wrapped Errors
    // ========================================

    /// Protocol error while encoding or decoding the stream.
    #[error(transparent)]
    Protocol(#[from] CoreError),
}

impl TransportError {
    // ========================================
    // Convenience Constructors
    // ========================================

    /// Creates a `BindFailed` error.
    pub fn bind_failed(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindFailed {
            addr,
            reason: reason.into(),
        }
    }

    /// Creates a `ConnectFailed` error.
    pub fn connect_failed(addr: impl ToString, reason: impl Into<String>) -> Self {
        Self::ConnectFailed {
            addr: addr.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a `LegClosed` error.
    pub fn leg_closed(peer: impl Into<String>) -> Self {
        Self::LegClosed { peer: peer.into() }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if this error is transient and retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::ConnectFailed { .. } => true,
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Returns `true` if this error came from the byte stream itself
    /// (framing, cipher, compression, phase).
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// Returns the wrapped `CoreError`, if any.
    #[must_use]
    pub const fn as_protocol(&self) -> Option<&CoreError> {
        match self {
            Self::Protocol(err) => Some(err),
            _ => None,
        }
    }
}

// ============================================
// Error Conversions
// ============================================

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            context: "unspecified I/O operation".into(),
            source: err,
        }
    }
}

// ============================================
// Tests
// ============================================
