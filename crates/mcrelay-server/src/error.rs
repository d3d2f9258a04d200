// ============================================
// File: crates/mcrelay-server/src/error.rs
// ============================================
//! # Server Error Types
//!
//! ## Creation Reason
//! Errors raised by sessions, plugins, the broadcast hub and the
//! server orchestrator.
//!
//! ## Error Categories
//! 1. **Config**: load and validation failures, fatal at startup
//! 2. **Recoverable**: a transfer or peer login failed, the session is
//!    untouched (`is_recoverable`)
//! 3. **Session**: the session is gone or cannot be created
//! 4. **Handler**: a plugin failed, isolated to one packet
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use mcrelay_common::error::CommonError;
use mcrelay_common::SessionId;
use mcrelay_core::error::CoreError;
use mcrelay_transport::error::TransportError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server error types.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        path: String,
        reason: String,
    },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        field: String,
        reason: String,
    },

    #[error("Handshake with {backend} timed out after {secs}s")]
    HandshakeTimeout {
        backend: String,
        secs: u64,
    },

    #[error("Backend {backend} rejected login: {reason}")]
    BackendRejected {
        backend: String,
        reason: String,
    },

    #[error("Backend {backend} requested encryption but no authenticator is configured")]
    AuthenticationUnavailable {
        backend: String,
    },

    #[error("Session {0} has no server leg yet")]
    NoServerLeg(SessionId),

    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    #[error("Session limit reached: max {limit} sessions")]
    SessionLimitReached {
        limit: usize,
    },

    #[error("Handler '{handler}' failed: {reason}")]
    HandlerFailure {
        handler: String,
        reason: String,
    },

    #[error("Invalid state: {reason}")]
    InvalidState {
        reason: String,
    },

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `BackendRejected` error.
    pub fn backend_rejected(backend: impl ToString, reason: impl Into<String>) -> Self {
        Self::BackendRejected {
            backend: backend.to_string(),
            reason: reason.into(),
        }
    }

    /// Creates a `HandlerFailure` error.
    pub fn handler(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HandlerFailure {
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidState` error.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Returns `true` for configuration errors.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    /// Returns `true` if the failed operation left the session intact.
    ///
    /// Used by `transfer_to` and `spawn_peer`: the caller may retry or
    /// carry on with the current backend.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::HandshakeTimeout { .. }
            | Self::BackendRejected { .. }
            | Self::AuthenticationUnavailable { .. } => true,
            Self::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns `true` if the error means the session's stream is broken.
    #[must_use]
    pub fn is_fatal_to_session(&self) -> bool {
        match self {
            Self::Core(e) => e.is_fatal_to_leg(),
            Self::Transport(TransportError::Protocol(e)) => e.is_fatal_to_leg(),
            Self::Transport(TransportError::Io { .. } | TransportError::LegClosed { .. }) => true,
            _ => false,
        }
    }
}
