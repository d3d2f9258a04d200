// ============================================
// File: crates/mcrelay-server/src/plugins/handshake.rs
// ============================================
//! # Handshake Plugin
//!
//! Reads the client's first packet, remembers its protocol version and
//! moves the client leg to Status or Login. The handshake itself is
//! never forwarded; the login plugin sends its own to the backend.

use tracing::debug;

use mcrelay_common::Direction;
use mcrelay_core::protocol::login::{ids, Handshake};
use mcrelay_core::protocol::Phase;

use crate::error::Result;
use crate::handlers::{handler_fn, EventBusBuilder, Listen, ListenerRegistryBuilder, PacketContext};
use crate::plugins::Plugin;

/// Handles client handshakes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HandshakePlugin;

impl Plugin for HandshakePlugin {
    fn name(&self) -> &'static str {
        "handshake"
    }

    fn register(&self, listeners: &mut ListenerRegistryBuilder, _events: &mut EventBusBuilder) {
        listeners.on(
            Listen::client(ids::HANDSHAKE, Phase::Handshaking).named("handshake"),
            handler_fn(on_handshake),
        );
    }
}

async fn on_handshake(ctx: PacketContext) -> Result<()> {
    let handshake = Handshake::decode(ctx.payload())?;
    let session = ctx.session();

    debug!(
        session_id = %session.id,
        protocol_version = handshake.protocol_version,
        address = %handshake.server_address,
        next = %handshake.next_phase,
        "Client handshake"
    );

    session.set_protocol_version(handshake.protocol_version);
    session.advance_phase(Direction::Client, handshake.next_phase)?;
    ctx.consume();
    Ok(())
}
