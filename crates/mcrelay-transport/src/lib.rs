// ============================================
// File: crates/mcrelay-transport/src/lib.rs
// ============================================
//! # mcrelay Transport - Stream I/O Layer
//!
//! ## Creation Reason
//! Provides the stream side of the proxy: binding the client listener,
//! dialing backends, and running the per-leg byte pipeline over an
//! async stream.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `Connector` and stream abstractions for testability
//! - [`tcp`]: TCP listener and connector
//! - [`leg`]: framed, staged packet I/O over one stream
//! - [`mock`]: in-memory connector for tests
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              mcrelay-server                         │
//! │                    │                                │
//! │         ┌──────────┴──────────┐                     │
//! │         ▼                     ▼                     │
//! │   mcrelay-core         mcrelay-transport            │
//! │                        You are here ◄──             │
//! │         │                     │                     │
//! │         └──────────┬──────────┘                     │
//! │                    ▼                                │
//! │             mcrelay-common                          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//!   game client ──TCP──► Leg(client) ══ Session ══ Leg(server) ──TCP──► backend
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Always go through `Connector` so sessions stay testable
//! - A leg has one reader but many writers
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod leg;
pub mod mock;
pub mod tcp;
pub mod traits;

// Re-export primary types
pub use error::{Result, TransportError};
pub use leg::{Leg, LegReader};
pub use mock::{MockBackend, MockConnector};
pub use tcp::{bind_listener, TcpConnector};
pub use traits::{BoxedStream, ByteStream, Connector};
