// ============================================
// File: crates/mcrelay-transport/src/traits.rs
// ============================================
//! # Transport Traits
//!
//! ## Creation Reason
//! Defines the seam between the session engine and real sockets, so
//! backends can be dialed over TCP in production and over in-memory
//! pipes in tests.
//!
//! ## Main Functionality
//! - `ByteStream`: any bidirectional async byte stream
//! - `BoxedStream`: type-erased stream handed to a `Leg`
//! - `Connector`: dials a backend address
//!
//! ## ⚠️ Important Note for Next Developer
//! - Implementations must be Send + Sync for use in async contexts
//! - A connector returns a raw stream, framing is the leg's job
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use mcrelay_common::BackendAddr;

use crate::error::Result;

// ============================================
// ByteStream
// ============================================

/// Bidirectional async byte stream.
///
/// Blanket-implemented for every `AsyncRead + AsyncWrite` type, so
/// `TcpStream` and `DuplexStream` both qualify.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased byte stream.
pub type BoxedStream = Box<dyn ByteStream>;

// ============================================
// Connector Trait
// ============================================

/// Opens outbound streams to backends.
///
/// # Example
/// ```ignore
/// async fn dial<C: Connector>(connector: &C) -> Result<Leg> {
///     let addr: BackendAddr = "mc.example.net:25565".parse()?;
///     let stream = connector.connect(&addr).await?;
///     Ok(Leg::open(stream, Direction::Server, DEFAULT_MAX_FRAME_LEN, addr.to_string()))
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to `addr`.
    ///
    /// # Errors
    /// `TransportError::ConnectFailed` if the backend cannot be reached.
    async fn connect(&self, addr: &BackendAddr) -> Result<BoxedStream>;
}
