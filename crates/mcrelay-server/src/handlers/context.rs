// ============================================
// File: crates/mcrelay-server/src/handlers/context.rs
// ============================================
//! # Packet Context
//!
//! ## Creation Reason
//! Every listener receives a `PacketContext`: the packet, the session it
//! arrived on and a small shared outcome recording whether the chain
//! consumed or rewrote the packet.
//!
//! ## Outcome Sharing
//! ```text
//!  Blocking A ─┐
//!  Blocking B ─┼─► shared Outcome ──► forwarding decision
//!  Blocking C ─┘
//!  Detached D ───► private Outcome (decision already made)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `reply` writes immediately, it is not deferred until the chain ends
//! - A Detached handler's `consume()` is recorded but never observed
//!
//! ## Last Modified
//! v0.1.0 - Initial packet context

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use mcrelay_common::Direction;
use mcrelay_core::protocol::{Packet, PayloadReader, Phase};

use crate::error::Result;
use crate::services::session::Session;

#[derive(Debug, Default)]
struct Outcome {
    consumed: bool,
    payload: Option<Bytes>,
}

/// Handle given to packet listeners.
#[derive(Clone)]
pub struct PacketContext {
    session: Arc<Session>,
    packet: Packet,
    outcome: Arc<Mutex<Outcome>>,
}

impl PacketContext {
    pub(crate) fn new(session: Arc<Session>, packet: Packet) -> Self {
        Self {
            session,
            packet,
            outcome: Arc::new(Mutex::new(Outcome::default())),
        }
    }

    /// Copy for a Detached handler: sees rewrites so far, shares nothing after.
    pub(crate) fn detach(&self) -> Self {
        let payload = self.outcome.lock().payload.clone();
        Self {
            session: Arc::clone(&self.session),
            packet: self.packet.clone(),
            outcome: Arc::new(Mutex::new(Outcome {
                consumed: false,
                payload,
            })),
        }
    }

    /// Session the packet arrived on.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The packet as read from the wire.
    #[must_use]
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// Packet id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.packet.id
    }

    /// Phase the packet was read in.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.packet.phase
    }

    /// Side that sent the packet.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.packet.direction
    }

    /// Current payload, including rewrites by earlier handlers.
    #[must_use]
    pub fn payload(&self) -> Bytes {
        self.outcome
            .lock()
            .payload
            .clone()
            .unwrap_or_else(|| self.packet.payload.clone())
    }

    /// Field reader over the current payload.
    #[must_use]
    pub fn reader(&self) -> PayloadReader {
        PayloadReader::new(self.payload())
    }

    /// Replaces the payload that will be forwarded.
    pub fn set_payload(&self, payload: impl Into<Bytes>) {
        self.outcome.lock().payload = Some(payload.into());
    }

    /// Marks the packet as handled; it will not be forwarded.
    pub fn consume(&self) {
        self.outcome.lock().consumed = true;
    }

    /// Returns `true` once any handler in the chain consumed the packet.
    #[must_use]
    pub fn is_consumed(&self) -> bool {
        self.outcome.lock().consumed
    }

    pub(crate) fn rewritten(&self) -> Option<Bytes> {
        self.outcome.lock().payload.clone()
    }

    /// Writes a packet to one side of the session.
    ///
    /// # Errors
    /// `NoServerLeg` before the backend is connected; transport errors.
    pub async fn reply(&self, to: Direction, id: u32, payload: &[u8]) -> Result<()> {
        self.session.send(to, id, payload).await
    }

    /// Writes a packet to the client.
    ///
    /// # Errors
    /// Transport errors.
    pub async fn send_to_client(&self, id: u32, payload: &[u8]) -> Result<()> {
        self.session.send_to_client(id, payload).await
    }

    /// Writes a packet to the backend.
    ///
    /// # Errors
    /// `NoServerLeg` before the backend is connected; transport errors.
    pub async fn send_to_server(&self, id: u32, payload: &[u8]) -> Result<()> {
        self.session.send_to_server(id, payload).await
    }
}

impl fmt::Debug for PacketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketContext")
            .field("session_id", &self.session.id)
            .field("packet_id", &self.packet.id)
            .field("phase", &self.packet.phase)
            .field("direction", &self.packet.direction)
            .field("consumed", &self.is_consumed())
            .finish()
    }
}
