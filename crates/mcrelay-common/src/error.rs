// ============================================
// File: crates/mcrelay-common/src/error.rs
// ============================================
//! # Common Error Types
//!
//! ## Creation Reason
//! Parse failures for the shared value types. Backend addresses arrive
//! from the CLI and the config file, session ids from log tooling.
//!
//! ## Main Functionality
//! - `CommonError`: address and session id parse errors
//! - `Result<T>`: Type alias using `CommonError`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Higher crates wrap this through `#[from]`; keep it small
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

// ============================================
// Result Type Alias
// ============================================

/// Common result type for operations that may fail.
pub type Result<T> = std::result::Result<T, CommonError>;

// ============================================
// CommonError
// ============================================

/// Errors raised while parsing shared value types.
///
/// # Example
/// ```
/// use mcrelay_common::error::{CommonError, Result};
///
/// fn require_host(host: &str) -> Result<()> {
///     if host.is_empty() {
///         return Err(CommonError::invalid_address(host, "host cannot be empty"));
///     }
///     Ok(())
/// }
///
/// assert!(require_host("").is_err());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommonError {
    /// A `host[:port]` string could not be parsed.
    #[error("Invalid address '{input}': {reason}")]
    InvalidAddress {
        /// The rejected input
        input: String,
        /// What is wrong with it
        reason: String,
    },

    /// A session id string is not base64 of the right length.
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),
}

impl CommonError {
    /// Creates an `InvalidAddress` error.
    pub fn invalid_address(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidSessionId` error.
    pub fn invalid_session_id(reason: impl Into<String>) -> Self {
        Self::InvalidSessionId(reason.into())
    }
}

impl From<base64::DecodeError> for CommonError {
    fn from(err: base64::DecodeError) -> Self {
        Self::InvalidSessionId(err.to_string())
    }
}

// ============================================
// Tests
// ============================================
