// ============================================
// File: crates/mcrelay-common/src/lib.rs
// ============================================
//! # mcrelay Common - Shared Types Library
//!
//! ## Creation Reason
//! Holds the small vocabulary every mcrelay crate speaks: session
//! identifiers, packet directions, backend addresses and the shared
//! error type.
//!
//! ## Main Functionality
//! - [`types`]: `SessionId`, `Direction`, `BackendAddr`
//! - [`time`]: Atomic instant for lock-free activity tracking
//! - [`error`]: Common error types and result aliases
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              mcrelay-server                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                    │
//! │         ▼                     ▼                    │
//! │   mcrelay-core  ◄──── mcrelay-transport            │
//! │         │                     │                    │
//! │         └──────────┬──────────┘                    │
//! │                    ▼                               │
//! │             mcrelay-common  ◄── You are here      │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the foundation - changes affect everything
//! - Keep dependencies minimal
//! - `Direction` always names the side that SENT a packet
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{CommonError, Result};
pub use types::{BackendAddr, Direction, SessionId};
