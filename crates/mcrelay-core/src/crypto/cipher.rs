// ============================================
// File: crates/mcrelay-core/src/crypto/cipher.rs
// ============================================
//! # Cipher Stage
//!
//! ## Creation Reason
//! After the Login encryption exchange every byte on a leg, length
//! prefixes included, passes through AES-128 in CFB8 mode. This stage
//! sits between the socket and the frame codec.
//!
//! ## Main Functionality
//! - `CipherStage`: identity until activated, then AES/CFB8 both ways
//! - Independent encrypt and decrypt stream states
//!
//! ## Stream Layout
//! ```text
//!   socket ──► decrypt ──► frame codec      (inbound)
//!   frame codec ──► encrypt ──► socket      (outbound)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - CFB8 is a stream mode: bytes must be processed exactly once, in
//!   order. Never decrypt bytes speculatively or twice.
//! - Activation is one-way for the life of the leg
//!
//! ## Last Modified
//! v0.1.0 - Initial cipher stage

use std::fmt;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes128;

use crate::crypto::AES_KEY_SIZE;
use crate::error::{CryptoError, Result};

type Encryptor = cfb8::Encryptor<Aes128>;
type Decryptor = cfb8::Decryptor<Aes128>;

// ============================================
// CipherStage
// ============================================

/// Per-leg AES/CFB8 stage.
///
/// # Example
/// ```
/// use mcrelay_core::crypto::CipherStage;
///
/// let secret = [7u8; 16];
/// let mut ours = CipherStage::new();
/// let mut theirs = CipherStage::new();
/// ours.activate(&secret, &secret).unwrap();
/// theirs.activate(&secret, &secret).unwrap();
///
/// let mut data = *b"hello";
/// ours.encrypt(&mut data);
/// theirs.decrypt(&mut data);
/// assert_eq!(&data, b"hello");
/// ```
#[derive(Default)]
pub struct CipherStage {
    streams: Option<(Encryptor, Decryptor)>,
}

impl CipherStage {
    /// Creates an inactive (identity) stage.
    #[must_use]
    pub const fn new() -> Self {
        Self { streams: None }
    }

    /// Returns `true` once `activate` has succeeded.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.streams.is_some()
    }

    /// Switches both directions to AES-128/CFB8.
    ///
    /// # Errors
    /// - `CryptoError::AlreadyActive` on a second call
    /// - `CryptoError::InvalidKey` unless key and IV are 16 bytes
    pub fn activate(&mut self, key: &[u8], iv: &[u8]) -> Result<()> {
        if self.is_active() {
            return Err(CryptoError::AlreadyActive.into());
        }
        check_len("key", key)?;
        check_len("iv", iv)?;

        let key = GenericArray::from_slice(key);
        let iv = GenericArray::from_slice(iv);
        self.streams = Some((Encryptor::new(key, iv), Decryptor::new(key, iv)));
        Ok(())
    }

    /// Encrypts `data` in place. No-op while inactive.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        if let Some((encryptor, _)) = self.streams.as_mut() {
            for byte in data.iter_mut() {
                encryptor.encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
            }
        }
    }

    /// Decrypts `data` in place. No-op while inactive.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        if let Some((_, decryptor)) = self.streams.as_mut() {
            for byte in data.iter_mut() {
                decryptor.decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
            }
        }
    }
}

fn check_len(what: &'static str, value: &[u8]) -> Result<()> {
    if value.len() != AES_KEY_SIZE {
        return Err(CryptoError::InvalidKey {
            what,
            expected: AES_KEY_SIZE,
            actual: value.len(),
        }
        .into());
    }
    Ok(())
}

impl fmt::Debug for CipherStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherStage")
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
