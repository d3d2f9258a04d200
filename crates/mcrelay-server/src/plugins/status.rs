// ============================================
// File: crates/mcrelay-server/src/plugins/status.rs
// ============================================
//! # Status Plugin
//!
//! Answers server-list pings locally from the `[status]` config section.
//! The backend is never contacted for Status.
//!
//! ```text
//! client ── 0x00 request ──► proxy ── 0x00 {"version",..} ──► client
//! client ── 0x01 ping(n) ──► proxy ── 0x01 pong(n) ─────────► client, close
//! ```

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use mcrelay_core::protocol::login::ids;
use mcrelay_core::protocol::{PayloadWriter, Phase};

use crate::config::StatusConfig;
use crate::error::Result;
use crate::handlers::{EventBusBuilder, Listen, ListenerRegistryBuilder, PacketContext, PacketHandler};
use crate::plugins::Plugin;

/// Serves status requests and pings.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusPlugin;

impl Plugin for StatusPlugin {
    fn name(&self) -> &'static str {
        "status"
    }

    fn register(&self, listeners: &mut ListenerRegistryBuilder, _events: &mut EventBusBuilder) {
        listeners
            .on(
                Listen::client(ids::STATUS_REQUEST, Phase::Status).named("status-request"),
                StatusRequest,
            )
            .on(
                Listen::client(ids::STATUS_PING, Phase::Status).named("status-ping"),
                StatusPing,
            );
    }
}

/// Builds the status JSON shown in the server list.
#[must_use]
pub fn status_json(config: &StatusConfig) -> String {
    json!({
        "version": { "name": config.version_name, "protocol": config.protocol },
        "players": { "max": config.max_players, "online": 0 },
        "description": { "text": config.motd },
    })
    .to_string()
}

struct StatusRequest;

#[async_trait]
impl PacketHandler for StatusRequest {
    async fn handle(&self, ctx: PacketContext) -> Result<()> {
        let body = status_json(&ctx.session().context().config.status);
        let payload = PayloadWriter::new().string(&body).finish();

        ctx.send_to_client(ids::STATUS_RESPONSE, &payload).await?;
        ctx.consume();
        Ok(())
    }
}

struct StatusPing;

#[async_trait]
impl PacketHandler for StatusPing {
    async fn handle(&self, ctx: PacketContext) -> Result<()> {
        ctx.consume();
        ctx.send_to_client(ids::STATUS_PONG, &ctx.payload()).await?;

        debug!(session_id = %ctx.session().id, "Status ping answered");
        ctx.session().close("status ping answered", true).await;
        Ok(())
    }
}
