// ============================================
// File: crates/mcrelay-server/src/config.rs
// ============================================
//! # Proxy Configuration
//!
//! ## Creation Reason
//! Provides configuration management for the proxy, loaded from TOML
//! and overridable from the command line.
//!
//! ## Main Functionality
//! - `ProxyConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//! - Defaults that work against a public server out of the box
//!
//! ## Configuration Sections
//! - `network`: client listen address, backend, spoofed address, dev flag
//! - `protocol`: frame limit, handshake timeout, handler failure policy
//! - `broadcast`: peer queue size, mirror direction, keep-alive id
//! - `limits`: session limit, shutdown grace period
//! - `status`: server list ping answer
//! - `logging`: Log level
//!
//! ## Example Configuration
//! ```toml
//! [network]
//! listen_addr = "127.0.0.1:41223"
//! backend = "mc.hypixel.net:25565"
//! spoof = "mc.hypixel.net:25565"
//!
//! [protocol]
//! handshake_timeout_secs = 10
//! on_handler_failure = "forward"
//!
//! [broadcast]
//! mirror = "client"
//!
//! [limits]
//! max_sessions = 100
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All config changes require a restart
//! - `network.dev` only swaps the backend default, nothing else
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use mcrelay_common::BackendAddr;
use mcrelay_core::protocol::login::PROTOCOL_VERSION;
use mcrelay_core::DEFAULT_MAX_FRAME_LEN;

use crate::error::{Result, ServerError};
use crate::handlers::FailurePolicy;
use crate::services::broadcast::MirrorDirection;

// ============================================
// ProxyConfig
// ============================================

/// Main proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Network configuration.
    #[serde(default)]
    pub network: NetworkConfig,

    /// Protocol engine configuration.
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Broadcast peer configuration.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Server list ping answer.
    #[serde(default)]
    pub status: StatusConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProxyConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    /// Returns error if file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!("Loading configuration from: {}", path_str);

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ServerError::config_load(&path_str, e.to_string()))?;

        config.validate()?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns error if the TOML is invalid or fails validation.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ServerError::config_load("<string>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// `ServerError::ConfigInvalid` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        self.network.validate()?;
        self.protocol.validate()?;
        self.broadcast.validate()?;
        self.limits.validate()?;
        self.status.validate()?;
        Ok(())
    }

    /// Serializes configuration to TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    // ========================================
    // Helper methods
    // ========================================

    /// Returns the client listen address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.network.listen_addr
    }

    /// Returns the backend new sessions connect to.
    #[must_use]
    pub fn backend(&self) -> BackendAddr {
        self.network.effective_backend()
    }

    /// Returns the handshake/login timeout.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.protocol.handshake_timeout_secs)
    }

    /// Returns the shutdown grace period.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.limits.shutdown_grace_secs)
    }
}

// ============================================
// NetworkConfig
// ============================================

/// Network configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the proxy accepts game clients on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Backend server sessions connect to.
    #[serde(default = "default_backend")]
    pub backend: BackendAddr,

    /// Host/port reported to the backend in the handshake instead of
    /// the backend address itself.
    #[serde(default)]
    pub spoof: Option<BackendAddr>,

    /// Development mode: the backend becomes `localhost:25565`.
    #[serde(default)]
    pub dev: bool,
}

/// Default client listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 41223;

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], DEFAULT_LISTEN_PORT))
}

fn default_backend() -> BackendAddr {
    BackendAddr::new("mc.hypixel.net", 25565)
}

fn dev_backend() -> BackendAddr {
    BackendAddr::new("localhost", 25565)
}

impl NetworkConfig {
    fn validate(&self) -> Result<()> {
        if self.backend.port == 0 {
            return Err(ServerError::config_invalid(
                "network.backend",
                "port cannot be 0",
            ));
        }
        if let Some(spoof) = &self.spoof {
            if spoof.port == 0 {
                return Err(ServerError::config_invalid(
                    "network.spoof",
                    "port cannot be 0",
                ));
            }
        }
        Ok(())
    }

    /// Backend after applying the dev flag.
    #[must_use]
    pub fn effective_backend(&self) -> BackendAddr {
        if self.dev {
            dev_backend()
        } else {
            self.backend.clone()
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            backend: default_backend(),
            spoof: None,
            dev: false,
        }
    }
}

// ============================================
// ProtocolConfig
// ============================================

/// Protocol engine configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Largest accepted or emitted frame body.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    /// Bound on backend handshake/login exchanges.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// What happens to a packet whose blocking handler failed.
    #[serde(default)]
    pub on_handler_failure: FailurePolicy,
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_handshake_timeout() -> u64 {
    10
}

impl ProtocolConfig {
    fn validate(&self) -> Result<()> {
        // Compressed bodies must at least hold a data-length indicator and an id.
        if self.max_frame_len < 16 {
            return Err(ServerError::config_invalid(
                "protocol.max_frame_len",
                "must be at least 16",
            ));
        }

        if self.max_frame_len > DEFAULT_MAX_FRAME_LEN {
            return Err(ServerError::config_invalid(
                "protocol.max_frame_len",
                format!("cannot exceed {DEFAULT_MAX_FRAME_LEN}"),
            ));
        }

        if self.handshake_timeout_secs == 0 {
            return Err(ServerError::config_invalid(
                "protocol.handshake_timeout_secs",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_len: default_max_frame_len(),
            handshake_timeout_secs: default_handshake_timeout(),
            on_handler_failure: FailurePolicy::default(),
        }
    }
}

// ============================================
// BroadcastConfig
// ============================================

/// Broadcast peer configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Packets buffered per peer before it is retired as too slow.
    #[serde(default = "default_peer_queue_capacity")]
    pub peer_queue_capacity: usize,

    /// Which side's packets are mirrored to peers.
    #[serde(default)]
    pub mirror: MirrorDirection,

    /// Play-phase keep-alive id echoed by peers.
    #[serde(default)]
    pub keep_alive_id: u32,
}

fn default_peer_queue_capacity() -> usize {
    1024
}

impl BroadcastConfig {
    fn validate(&self) -> Result<()> {
        if self.peer_queue_capacity == 0 {
            return Err(ServerError::config_invalid(
                "broadcast.peer_queue_capacity",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            peer_queue_capacity: default_peer_queue_capacity(),
            mirror: MirrorDirection::default(),
            keep_alive_id: 0,
        }
    }
}

// ============================================
// LimitsConfig
// ============================================

/// Resource limits configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrent sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Seconds to wait for sessions to drain after the first Ctrl+C.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_max_sessions() -> usize {
    100
}

fn default_shutdown_grace() -> u64 {
    30
}

impl LimitsConfig {
    fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(ServerError::config_invalid(
                "limits.max_sessions",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

// ============================================
// StatusConfig
// ============================================

/// Server list ping answer section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Version name shown in the server list.
    #[serde(default = "default_version_name")]
    pub version_name: String,

    /// Protocol number advertised.
    #[serde(default = "default_protocol")]
    pub protocol: i32,

    /// Message of the day.
    #[serde(default = "default_motd")]
    pub motd: String,

    /// Advertised player slots.
    #[serde(default = "default_max_players")]
    pub max_players: u32,
}

fn default_version_name() -> String {
    "1.8.9".to_string()
}

const fn default_protocol() -> i32 {
    PROTOCOL_VERSION
}

fn default_motd() -> String {
    "mcrelay".to_string()
}

const fn default_max_players() -> u32 {
    1
}

impl StatusConfig {
    fn validate(&self) -> Result<()> {
        if self.version_name.is_empty() {
            return Err(ServerError::config_invalid(
                "status.version_name",
                "cannot be empty",
            ));
        }
        Ok(())
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            version_name: default_version_name(),
            protocol: default_protocol(),
            motd: default_motd(),
            max_players: default_max_players(),
        }
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// Tests
// ============================================
