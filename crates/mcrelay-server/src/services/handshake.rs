// ============================================
// File: crates/mcrelay-server/src/services/handshake.rs
// ============================================
//! # Backend Login Service
//!
//! ## Creation Reason
//! Transfers and broadcast peers need a fresh, fully logged-in server
//! leg without involving the client. This module replays the client's
//! handshake and login start against a backend and drives the Login
//! phase to completion.
//!
//! ## Main Functionality
//! - `backend_login`: timeout-bounded Login exchange on a new leg
//! - `LoginProfile`: what gets replayed (username, protocol version)
//! - `Authenticator`: answers EncryptionRequests
//!
//! ## Login Flow
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      backend_login                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  1. Connect (Connector)                                      │
//! │     │                                                        │
//! │     ▼                                                        │
//! │  2. Send Handshake (reported address, next = Login)          │
//! │     │                                                        │
//! │     ▼                                                        │
//! │  3. Send LoginStart (stored username)                        │
//! │     │                                                        │
//! │     ▼                                                        │
//! │  4. Loop on server packets                                   │
//! │       0x03 SetCompression  → leg threshold                   │
//! │       0x01 EncRequest      → Authenticator, then cipher on   │
//! │       0x02 LoginSuccess    → leg to Play, done               │
//! │       0x00 Disconnect      → BackendRejected                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Error Handling
//! - Timeout: `HandshakeTimeout`, the half-open leg is dropped
//! - Disconnect or EOF before LoginSuccess: `BackendRejected`
//! - Encryption without authenticator: `AuthenticationUnavailable`
//!
//! ## ⚠️ Important Note for Next Developer
//! - Nothing here touches the session's current server leg. Callers
//!   swap legs only after `backend_login` succeeded.
//!
//! ## Last Modified
//! v0.1.0 - Initial backend login

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use mcrelay_common::{BackendAddr, Direction};
use mcrelay_core::crypto::SharedSecret;
use mcrelay_core::protocol::login::{
    decode_disconnect, decode_set_compression, ids, EncryptionRequest, Handshake, LoginStart,
    LoginSuccess,
};
use mcrelay_core::protocol::Phase;
use mcrelay_transport::{Leg, LegReader};

use crate::error::{Result, ServerError};
use crate::services::session::ProxyContext;

// ============================================
// LoginProfile / Authenticator
// ============================================

/// Identity replayed on every backend leg of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginProfile {
    /// Protocol version from the client's handshake.
    pub protocol_version: i32,
    /// Username from the client's login start.
    pub username: String,
}

/// Answer to a server EncryptionRequest.
pub struct EncryptionAnswer {
    /// Complete EncryptionResponse payload to send to the server.
    pub response_payload: Bytes,
    /// Secret used as AES key and IV once the response is sent.
    pub shared_secret: SharedSecret,
}

impl fmt::Debug for EncryptionAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionAnswer")
            .field("response_len", &self.response_payload.len())
            .field("shared_secret", &self.shared_secret)
            .finish()
    }
}

/// Produces EncryptionResponses for online-mode backends.
///
/// Session-server calls and RSA are up to the implementation; the
/// engine only needs the response payload and the secret.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Answers `request` on behalf of `profile`.
    ///
    /// # Errors
    /// Any error fails the login attempt.
    async fn answer(
        &self,
        profile: &LoginProfile,
        request: &EncryptionRequest,
    ) -> Result<EncryptionAnswer>;
}

// ============================================
// backend_login
// ============================================

/// A logged-in server leg, ready to be installed on a session.
pub struct BackendLogin {
    /// Write side, already in Play.
    pub leg: Arc<Leg>,
    /// Read side, to be handed to a read loop.
    pub reader: LegReader,
    /// The server's LoginSuccess.
    pub success: LoginSuccess,
}

impl fmt::Debug for BackendLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendLogin")
            .field("leg", &self.leg)
            .field("success", &self.success)
            .finish_non_exhaustive()
    }
}

/// Opens a new server leg to `addr` and logs in as `profile`.
///
/// `reported` is the host/port written into the handshake.
///
/// # Errors
/// `HandshakeTimeout`, `BackendRejected`, `AuthenticationUnavailable`,
/// connect and protocol errors. On error the new leg is discarded.
pub async fn backend_login(
    ctx: &ProxyContext,
    addr: &BackendAddr,
    reported: &BackendAddr,
    profile: &LoginProfile,
) -> Result<BackendLogin> {
    let timeout = ctx.config.handshake_timeout();

    match tokio::time::timeout(timeout, login_exchange(ctx, addr, reported, profile)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(backend = %addr, timeout_secs = timeout.as_secs(), "Backend login timed out");
            Err(ServerError::HandshakeTimeout {
                backend: addr.to_string(),
                secs: timeout.as_secs(),
            })
        }
    }
}

async fn login_exchange(
    ctx: &ProxyContext,
    addr: &BackendAddr,
    reported: &BackendAddr,
    profile: &LoginProfile,
) -> Result<BackendLogin> {
    debug!(backend = %addr, username = %profile.username, "Starting backend login");

    // Step 1: Connect
    let stream = ctx.connector.connect(addr).await?;
    let (leg, mut reader) = Leg::open(
        stream,
        Direction::Server,
        ctx.config.protocol.max_frame_len,
        addr.to_string(),
    );

    // Step 2: Handshake
    let handshake = Handshake {
        protocol_version: profile.protocol_version,
        server_address: reported.host.clone(),
        server_port: reported.port,
        next_phase: Phase::Login,
    };
    leg.send(ids::HANDSHAKE, &handshake.encode()).await?;
    leg.advance(Phase::Login)?;

    // Step 3: Login start
    let start = LoginStart {
        username: profile.username.clone(),
    };
    leg.send(ids::LOGIN_START, &start.encode()).await?;

    // Step 4: Drive Login until success or rejection
    loop {
        let Some(packet) = reader.read_packet().await? else {
            return Err(ServerError::backend_rejected(
                addr,
                "connection closed during login",
            ));
        };
        packet.phase.check(packet.id, packet.direction)?;

        match packet.id {
            ids::SET_COMPRESSION => {
                leg.set_compression(decode_set_compression(packet.payload)?);
            }
            ids::ENCRYPTION_REQUEST => {
                let authenticator =
                    ctx.authenticator
                        .as_ref()
                        .ok_or_else(|| ServerError::AuthenticationUnavailable {
                            backend: addr.to_string(),
                        })?;
                let request = EncryptionRequest::decode(packet.payload)?;
                let answer = authenticator.answer(profile, &request).await?;

                leg.send(ids::ENCRYPTION_RESPONSE, &answer.response_payload)
                    .await?;
                let secret = answer.shared_secret.as_bytes();
                leg.activate_encryption(secret, secret)?;
            }
            ids::LOGIN_SUCCESS => {
                let success = LoginSuccess::decode(packet.payload)?;
                leg.advance(Phase::Play)?;
                info!(
                    backend = %addr,
                    username = %success.username,
                    compression = leg.compression_threshold(),
                    encrypted = leg.is_encrypted(),
                    "Backend login complete"
                );
                return Ok(BackendLogin {
                    leg,
                    reader,
                    success,
                });
            }
            ids::LOGIN_DISCONNECT => {
                let reason = decode_disconnect(packet.payload)
                    .unwrap_or_else(|_| "disconnected".to_string());
                return Err(ServerError::backend_rejected(addr, reason));
            }
            other => {
                debug!(backend = %addr, packet_id = other, "Ignoring login packet");
            }
        }
    }
}

// ============================================
// Tests
// ============================================
