// ============================================
// File: crates/mcrelay-core/src/crypto/secret.rs
// ============================================
//! # Shared Secret
//!
//! ## Creation Reason
//! The 16-byte secret negotiated during Login keys the cipher stage
//! (as both key and IV). It must not linger in memory or leak into logs.
//!
//! ## ⚠️ Important Note for Next Developer
//! - `SharedSecret` zeroizes on drop and redacts itself in `Debug`
//! - Generate with `OsRng` only
//!
//! ## Last Modified
//! v0.1.0 - Initial shared secret type

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::AES_KEY_SIZE;
use crate::error::{CryptoError, Result};

/// Symmetric secret agreed with a server during Login.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; AES_KEY_SIZE]);

impl SharedSecret {
    /// Generates a fresh random secret.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; AES_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wraps existing key material.
    ///
    /// # Errors
    /// `CryptoError::InvalidKey` unless `bytes` is exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; AES_KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKey {
            what: "key",
            expected: AES_KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Returns the raw secret.
    ///
    /// Do not log or persist the returned bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; AES_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}
