// ============================================
// File: crates/mcrelay-common/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the identifiers and small value types that flow between
//! the protocol engine, the transport layer and the proxy server.
//!
//! ## Main Functionality
//! - `SessionId`: Random identifier attached to every proxied session
//! - `Direction`: Which side of a session sent a packet
//! - `BackendAddr`: `host:port` of a remote server, as written in config
//!
//! ## ⚠️ Important Note for Next Developer
//! - `SessionId` is a logging/lookup key only, it is never sent on the wire
//! - `BackendAddr` keeps the host as a string: the handshake packet reports
//!   the name verbatim, so it must not be resolved early
//!
//! ## Last Modified
//! v0.1.0 - Initial type definitions

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::CommonError;

// ============================================
// Constants
// ============================================

/// Size of SessionId in bytes
pub const SESSION_ID_SIZE: usize = 16;

/// Port assumed when a backend address omits one.
pub const DEFAULT_GAME_PORT: u16 = 25565;

// ============================================
// SessionId
// ============================================

/// Unique identifier for a proxied session.
///
/// Displayed as base64 so it can be grepped across log lines.
///
/// # Example
/// ```
/// use mcrelay_common::types::SessionId;
///
/// let id = SessionId::generate();
/// let parsed: SessionId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_SIZE]);

impl SessionId {
    /// Creates a new `SessionId` from raw bytes.
    ///
    /// Returns `None` if `bytes` is not exactly 16 bytes long.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let id: [u8; SESSION_ID_SIZE] = bytes.try_into().ok()?;
        Some(Self(id))
    }

    /// Generates a new random `SessionId`.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; SESSION_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut id);
        Self(id)
    }

    /// Returns the raw bytes of the session ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionId({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", BASE64.encode(self.0))
    }
}

impl FromStr for SessionId {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64.decode(s)?;
        Self::from_bytes(&bytes)
            .ok_or_else(|| CommonError::invalid_session_id(format!("{} bytes", bytes.len())))
    }
}

// ============================================
// Direction
// ============================================

/// The side of a session that sent a packet.
///
/// ```text
///   Client ──(Direction::Client)──► proxy ──► Server
///   Client ◄── proxy ◄──(Direction::Server)── Server
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent by the game client (serverbound).
    Client,
    /// Sent by the remote server (clientbound).
    Server,
}

impl Direction {
    /// Returns the side a forwarded packet is written to.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Client => Self::Server,
            Self::Server => Self::Client,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

// ============================================
// BackendAddr
// ============================================

/// Address of a remote game server.
///
/// Parsed from `host:port` or bare `host` (port defaults to 25565).
///
/// # Example
/// ```
/// use mcrelay_common::types::BackendAddr;
///
/// let addr: BackendAddr = "mc.example.net".parse().unwrap();
/// assert_eq!(addr.port, 25565);
/// assert_eq!(addr.to_string(), "mc.example.net:25565");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackendAddr {
    /// Host name or IP literal, kept unresolved.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl BackendAddr {
    /// Creates a new backend address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for BackendAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for BackendAddr {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    CommonError::invalid_address(s, format!("bad port '{port}': {e}"))
                })?;
                (host, port)
            }
            None => (s, DEFAULT_GAME_PORT),
        };

        if host.is_empty() {
            return Err(CommonError::invalid_address(s, "host cannot be empty"));
        }

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for BackendAddr {
    type Error = CommonError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendAddr> for String {
    fn from(addr: BackendAddr) -> Self {
        addr.to_string()
    }
}

// ============================================
// Tests
// ============================================
