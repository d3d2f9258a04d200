// ============================================
// File: crates/mcrelay-server/src/plugins/login.rs
// ============================================
//! # Login Plugin
//!
//! ## Creation Reason
//! Drives the primary session through Login: opens the server leg when
//! the client sends its login start and keeps the backend's encryption
//! and compression on the server leg only. The client leg stays plain.
//!
//! ## Main Functionality
//! ```text
//! client 0x00 LoginStart     → store username, connect_backend, forward
//! server 0x01 EncRequest     → Authenticator → response → cipher on
//! server 0x03 SetCompression → server-leg threshold
//! server 0x02 LoginSuccess   → both legs to Play, send to client, "login_success"
//! server 0x00 Disconnect     → forward, close
//! server 0x46 SetCompression → server-leg threshold (Play)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All handlers are Blocking: the cipher and thresholds must be in
//!   place before the server loop reads the next frame
//!
//! ## Last Modified
//! v0.1.0 - Initial login plugin

use serde_json::json;
use tracing::{debug, info, warn};

use mcrelay_common::Direction;
use mcrelay_core::protocol::login::{
    decode_disconnect, decode_set_compression, ids, EncryptionRequest, LoginStart, LoginSuccess,
};
use mcrelay_core::protocol::Phase;

use crate::error::{Result, ServerError};
use crate::handlers::{handler_fn, EventBusBuilder, Listen, ListenerRegistryBuilder, PacketContext};
use crate::plugins::Plugin;

/// Handles the Login phase of primary sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginPlugin;

impl Plugin for LoginPlugin {
    fn name(&self) -> &'static str {
        "login"
    }

    fn register(&self, listeners: &mut ListenerRegistryBuilder, _events: &mut EventBusBuilder) {
        listeners
            .on(
                Listen::client(ids::LOGIN_START, Phase::Login)
                    .forwarding()
                    .named("login-start"),
                handler_fn(on_login_start),
            )
            .on(
                Listen::server(ids::ENCRYPTION_REQUEST, Phase::Login).named("encryption-request"),
                handler_fn(on_encryption_request),
            )
            .on(
                Listen::server(ids::SET_COMPRESSION, Phase::Login).named("set-compression"),
                handler_fn(on_set_compression),
            )
            .on(
                Listen::server(ids::LOGIN_SUCCESS, Phase::Login).named("login-success"),
                handler_fn(on_login_success),
            )
            .on(
                Listen::server(ids::LOGIN_DISCONNECT, Phase::Login).named("login-disconnect"),
                handler_fn(on_login_disconnect),
            )
            .on(
                Listen::server(ids::PLAY_SET_COMPRESSION, Phase::Play).named("play-set-compression"),
                handler_fn(on_set_compression),
            );
    }
}

async fn on_login_start(ctx: PacketContext) -> Result<()> {
    let start = LoginStart::decode(ctx.payload())?;
    let session = ctx.session();

    info!(session_id = %session.id, username = %start.username, "Client login");
    session.set_username(start.username);

    if let Err(e) = session.connect_backend().await {
        warn!(
            session_id = %session.id,
            backend = %session.backend(),
            error = %e,
            "Backend connection failed"
        );
        ctx.consume();
        session.close(format!("Could not connect to backend: {e}"), false).await;
    }
    Ok(())
}

async fn on_encryption_request(ctx: PacketContext) -> Result<()> {
    ctx.consume();
    let session = ctx.session();

    let Some(authenticator) = session.context().authenticator.clone() else {
        warn!(session_id = %session.id, "Backend requires authentication, none configured");
        session
            .close("Backend requires authentication", false)
            .await;
        return Ok(());
    };
    let profile = session
        .profile()
        .ok_or_else(|| ServerError::invalid_state("encryption request before login start"))?;
    let leg = session
        .server_leg()
        .ok_or_else(|| ServerError::NoServerLeg(session.id))?;

    let request = EncryptionRequest::decode(ctx.payload())?;
    let answer = authenticator.answer(&profile, &request).await?;
    leg.send(ids::ENCRYPTION_RESPONSE, &answer.response_payload)
        .await?;

    let secret = answer.shared_secret.as_bytes();
    leg.activate_encryption(secret, secret)?;
    debug!(session_id = %session.id, "Server leg encrypted");
    Ok(())
}

async fn on_set_compression(ctx: PacketContext) -> Result<()> {
    ctx.consume();
    let threshold = decode_set_compression(ctx.payload())?;
    let session = ctx.session();

    let leg = session
        .server_leg()
        .ok_or_else(|| ServerError::NoServerLeg(session.id))?;
    leg.set_compression(threshold);
    debug!(session_id = %session.id, threshold, "Server leg compression set");
    Ok(())
}

async fn on_login_success(ctx: PacketContext) -> Result<()> {
    ctx.consume();
    let success = LoginSuccess::decode(ctx.payload())?;
    let session = ctx.session();

    // The client leg switches before the packet goes out, so its first
    // Play packet is read in Play. Subscribers write after it.
    session.advance_phase(Direction::Server, Phase::Play)?;
    session.advance_phase(Direction::Client, Phase::Play)?;
    ctx.send_to_client(ids::LOGIN_SUCCESS, &ctx.payload()).await?;

    info!(
        session_id = %session.id,
        username = %success.username,
        uuid = %success.uuid,
        backend = %session.backend(),
        "Login complete"
    );
    session
        .emit(
            "login_success",
            json!({ "username": success.username, "uuid": success.uuid }),
        )
        .await;
    Ok(())
}

async fn on_login_disconnect(ctx: PacketContext) -> Result<()> {
    ctx.consume();
    let session = ctx.session();
    let reason = decode_disconnect(ctx.payload()).unwrap_or_else(|_| "Disconnected".to_string());

    if let Err(e) = ctx.send_to_client(ids::LOGIN_DISCONNECT, &ctx.payload()).await {
        debug!(session_id = %session.id, error = %e, "Disconnect not forwarded");
    }
    session.close(format!("Backend refused login: {reason}"), true).await;
    Ok(())
}
