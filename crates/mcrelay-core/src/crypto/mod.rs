// ============================================
// File: crates/mcrelay-core/src/crypto/mod.rs
// ============================================
//! # Cryptography Module
//!
//! ## Creation Reason
//! Holds the symmetric cipher that protects a leg once the Login
//! encryption exchange has completed.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`cipher`]: AES-128/CFB8 stream stage
//! - [`secret`]: 16-byte shared secret used as both key and IV
//!
//! ## Key Schedule
//! ```text
//!   SharedSecret (16 bytes) ──┬──► AES key
//!                             └──► CFB8 IV
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Uses RustCrypto `aes` + `cfb8`, never roll the mode by hand
//! - `SharedSecret` zeroizes on drop, do not copy its bytes around
//!
//! ## Last Modified
//! v0.1.0 - Initial cipher stage

pub mod cipher;
pub mod secret;

pub use cipher::CipherStage;
pub use secret::SharedSecret;

/// AES-128 key size; also the CFB8 IV size.
pub const AES_KEY_SIZE: usize = 16;
