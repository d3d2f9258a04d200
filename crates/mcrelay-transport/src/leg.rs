// ============================================
// File: crates/mcrelay-transport/src/leg.rs
// ============================================
//! # Protocol Leg
//!
//! ## Creation Reason
//! A leg is one side of a proxied session: the client-facing stream or
//! the server-facing stream. It owns the per-leg protocol pipeline
//! (phase, cipher, compression) and turns raw bytes into `Packet`s and
//! back.
//!
//! ## Main Functionality
//! - `Leg`: shared write half plus pipeline state
//! - `LegReader`: exclusive read half, yields one packet per call
//!
//! ## Pipeline
//! ```text
//! read:   socket ─► BufReader ─► decrypt (per consumed byte)
//!                 ─► VarInt length ─► body ─► decompress ─► Packet
//!
//! write:  (id, payload) ─► body ─► compress ─► length prefix
//!                 ─► encrypt ─► socket
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Bytes are decrypted when CONSUMED, not when buffered. Encryption is
//!   switched on between two frames by a handler, and bytes already in
//!   the `BufReader` must be decrypted with the new state.
//! - Encryption happens while the writer lock is held so the CFB8
//!   stream order always matches the socket write order
//! - `LegState` is a sync lock, never hold it across an `.await`
//!
//! ## Last Modified
//! v0.1.0 - Initial leg implementation

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tracing::{debug, trace};

use mcrelay_common::Direction;
use mcrelay_core::compression::CompressionStage;
use mcrelay_core::crypto::CipherStage;
use mcrelay_core::error::CoreError;
use mcrelay_core::protocol::varint::{put_varint, varint_len, VarIntDecoder};
use mcrelay_core::protocol::{encode_body, ConnectionState, FrameCodec, Packet, Phase};

use crate::error::{Result, TransportError};
use crate::traits::BoxedStream;

// ============================================
// LegState
// ============================================

/// Mutable pipeline state shared by both halves of a leg.
#[derive(Debug)]
struct LegState {
    phase: ConnectionState,
    cipher: CipherStage,
    compression: CompressionStage,
}

// ============================================
// Leg
// ============================================

/// Write half and pipeline state of one leg.
///
/// Shared behind `Arc`; any task may send on it.
pub struct Leg {
    /// Side at the far end of this leg (sender of packets read here).
    remote: Direction,
    /// Human readable peer label for logs and errors.
    peer: String,
    codec: FrameCodec,
    state: Mutex<LegState>,
    writer: tokio::sync::Mutex<WriteHalf<BoxedStream>>,
    closed: AtomicBool,
    packets_in: AtomicU64,
    packets_out: AtomicU64,
}

impl Leg {
    /// Wraps a stream into a leg.
    ///
    /// `remote` is the side at the far end: `Direction::Client` for the
    /// client-facing leg, `Direction::Server` for a backend leg.
    #[must_use]
    pub fn open(
        stream: BoxedStream,
        remote: Direction,
        max_frame_len: usize,
        peer: impl Into<String>,
    ) -> (Arc<Self>, LegReader) {
        let (read_half, write_half) = tokio::io::split(stream);
        let leg = Arc::new(Self {
            remote,
            peer: peer.into(),
            codec: FrameCodec::new(max_frame_len),
            state: Mutex::new(LegState {
                phase: ConnectionState::new(),
                cipher: CipherStage::new(),
                compression: CompressionStage::new(max_frame_len),
            }),
            writer: tokio::sync::Mutex::new(write_half),
            closed: AtomicBool::new(false),
            packets_in: AtomicU64::new(0),
            packets_out: AtomicU64::new(0),
        });
        let reader = LegReader {
            leg: Arc::clone(&leg),
            inner: BufReader::new(read_half),
        };
        (leg, reader)
    }

    // ========================================
    // Accessors
    // ========================================

    /// Side at the far end of this leg.
    #[must_use]
    pub const fn remote(&self) -> Direction {
        self.remote
    }

    /// Peer label.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Maximum frame body length.
    #[must_use]
    pub const fn max_frame_len(&self) -> usize {
        self.codec.max_len()
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.lock().phase.current()
    }

    /// Advances the phase.
    ///
    /// # Errors
    /// `CoreError::InvalidTransition` if `to` is not a valid successor.
    pub fn advance(&self, to: Phase) -> Result<()> {
        self.state.lock().phase.advance(to)?;
        trace!(peer = %self.peer, phase = %to, "Leg phase advanced");
        Ok(())
    }

    /// Applies a SetCompression threshold to both directions.
    pub fn set_compression(&self, threshold: i32) {
        self.state.lock().compression.set_threshold(threshold);
        debug!(peer = %self.peer, threshold, "Leg compression threshold set");
    }

    /// Current compression threshold (`-1` when disabled).
    #[must_use]
    pub fn compression_threshold(&self) -> i32 {
        self.state.lock().compression.threshold()
    }

    /// Switches both directions to AES/CFB8.
    ///
    /// # Errors
    /// `CryptoError::AlreadyActive` or `CryptoError::InvalidKey`.
    pub fn activate_encryption(&self, key: &[u8], iv: &[u8]) -> Result<()> {
        self.state.lock().cipher.activate(key, iv)?;
        debug!(peer = %self.peer, "Leg encryption activated");
        Ok(())
    }

    /// Returns `true` once encryption is active.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.state.lock().cipher.is_active()
    }

    /// Returns `true` after `shutdown`.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Packets read from this leg so far.
    #[must_use]
    pub fn packets_in(&self) -> u64 {
        self.packets_in.load(Ordering::Relaxed)
    }

    /// Packets written to this leg so far.
    #[must_use]
    pub fn packets_out(&self) -> u64 {
        self.packets_out.load(Ordering::Relaxed)
    }

    // ========================================
    // Write Path
    // ========================================

    /// Writes one packet.
    ///
    /// # Errors
    /// - `LegClosed` after `shutdown`
    /// - `Protocol` if the body exceeds the frame maximum
    /// - `Io` if the socket write fails
    pub async fn send(&self, id: u32, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::leg_closed(&self.peer));
        }

        let body = encode_body(id, payload);
        let mut writer = self.writer.lock().await;

        let wire = {
            let mut state = self.state.lock();
            let body = state.compression.encode(&body)?;
            let frame = self.codec.encode(&body)?;
            let mut wire = BytesMut::from(frame.as_ref());
            state.cipher.encrypt(&mut wire);
            wire
        };

        writer
            .write_all(&wire)
            .await
            .map_err(|e| TransportError::io(format!("writing to {}", self.peer), e))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::io(format!("flushing {}", self.peer), e))?;
        drop(writer);

        self.packets_out.fetch_add(1, Ordering::Relaxed);
        trace!(peer = %self.peer, packet_id = id, len = payload.len(), "Packet sent");
        Ok(())
    }

    /// Writes a packet that was read from another leg.
    ///
    /// # Errors
    /// Same as [`Leg::send`].
    pub async fn forward(&self, packet: &Packet) -> Result<()> {
        self.send(packet.id, &packet.payload).await
    }

    /// Closes the write half. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            trace!(peer = %self.peer, error = %e, "Leg shutdown error ignored");
        }
        debug!(peer = %self.peer, "Leg closed");
    }
}

impl fmt::Debug for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leg")
            .field("remote", &self.remote)
            .field("peer", &self.peer)
            .field("phase", &self.phase())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================
// LegReader
// ============================================

/// Read half of a leg. Owned by exactly one read loop.
pub struct LegReader {
    leg: Arc<Leg>,
    inner: BufReader<ReadHalf<BoxedStream>>,
}

impl LegReader {
    /// The leg this reader belongs to.
    #[must_use]
    pub fn leg(&self) -> &Arc<Leg> {
        &self.leg
    }

    /// Reads one frame body, decrypted but still compressed.
    ///
    /// Returns `Ok(None)` if the peer closed before the first byte of a
    /// new frame.
    ///
    /// # Errors
    /// - `FramingError::Truncated` if the stream ends mid-frame
    /// - `FramingError::TooLarge` as soon as the length prefix is read
    /// - `FramingError::VarIntTooLong` for a malformed prefix
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        let mut decoder = VarIntDecoder::new();
        let len = loop {
            let mut byte = match self.inner.read_u8().await {
                Ok(byte) => byte,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    if decoder.consumed() == 0 {
                        return Ok(None);
                    }
                    return Err(CoreError::truncated("length prefix").into());
                }
                Err(e) => return Err(self.read_error(e)),
            };
            self.leg
                .state
                .lock()
                .cipher
                .decrypt(std::slice::from_mut(&mut byte));
            if let Some(len) = decoder.push(byte)? {
                break len as usize;
            }
        };
        self.leg.codec.check_len(len)?;

        let mut body = vec![0u8; len];
        if let Err(e) = self.inner.read_exact(&mut body).await {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(CoreError::truncated("body").into());
            }
            return Err(self.read_error(e));
        }
        self.leg.state.lock().cipher.decrypt(&mut body);

        Ok(Some(Bytes::from(body)))
    }

    /// Reads and decodes one packet, tagged with the leg's current phase.
    ///
    /// # Errors
    /// Framing, cipher and compression failures; `Malformed` for a body
    /// without a packet id.
    pub async fn read_packet(&mut self) -> Result<Option<Packet>> {
        let Some(frame) = self.read_frame().await? else {
            return Ok(None);
        };

        let (compression, phase) = {
            let state = self.leg.state.lock();
            (state.compression, state.phase.current())
        };
        let body = compression.decode(frame)?;
        let packet = Packet::parse(body, phase, self.leg.remote)?;

        self.leg.packets_in.fetch_add(1, Ordering::Relaxed);
        trace!(
            peer = %self.leg.peer,
            packet_id = packet.id,
            phase = %phase,
            len = packet.payload.len(),
            "Packet received"
        );
        Ok(Some(packet))
    }

    fn read_error(&self, e: io::Error) -> TransportError {
        TransportError::io(format!("reading from {}", self.leg.peer), e)
    }
}

impl fmt::Debug for LegReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegReader").field("leg", &self.leg).finish()
    }
}

// ============================================
// Helpers
// ============================================

/// Builds the exact plaintext wire bytes of an uncompressed frame.
///
/// Useful for peers that speak to a leg without a `Leg` of their own.
#[must_use]
pub fn plain_frame(id: u32, payload: &[u8]) -> Bytes {
    let body = encode_body(id, payload);
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    let mut buf = BytesMut::with_capacity(varint_len(len) + body.len());
    put_varint(&mut buf, len);
    buf.extend_from_slice(&body);
    buf.freeze()
}

// ============================================
// Tests
// ============================================
