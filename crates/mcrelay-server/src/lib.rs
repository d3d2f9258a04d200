// ============================================
// File: crates/mcrelay-server/src/lib.rs
// ============================================
//! # mcrelay Server Library
//!
//! ## Creation Reason
//! Session layer of the proxy: pairs each client connection with a
//! backend connection, runs packets through plugin listeners and exposes
//! transfer and broadcast operations.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`config`]: TOML configuration
//! - [`server`]: listener and shutdown orchestration
//! - [`services`]: sessions, backend login, broadcast peers
//!   - [`services::session`]: session lifecycle and dispatch
//!   - [`services::handshake`]: backend login
//!   - [`services::broadcast`]: broadcast hub
//! - [`handlers`]: listener registry, packet context, event bus
//! - [`plugins`]: plugin trait and built-in plugins
//! - [`error`]: server error types
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            mcrelay                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐    │
//! │  │   Config    │────►│   Server    │────►│ SessionManager  │    │
//! │  └─────────────┘     └─────────────┘     └────────┬────────┘    │
//! │                                                   │             │
//! │         ┌───────────────────┬─────────────────────┘             │
//! │         ▼                   ▼                                   │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐        │
//! │  │  Session    │────►│  Listener   │────►│   Plugins   │        │
//! │  │  loops      │     │  Registry   │     │  EventBus   │        │
//! │  └──────┬──────┘     └─────────────┘     └─────────────┘        │
//! │         │                                                       │
//! ├─────────┼───────────────────────────────────────────────────────┤
//! │         ▼              Transport Layer                          │
//! │  ┌─────────────────────┐     ┌─────────────────────────────┐    │
//! │  │  Leg (client side)  │     │  Leg (server side / peers)  │    │
//! │  └─────────────────────┘     └─────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//! ```text
//! Client → Leg → Phase check → Listeners → Leg → Backend
//! Client ← Leg ← Listeners ← Phase check ← Leg ← Backend
//!                    └──► Broadcast peers (mirror)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Plugins are registered once; configuration changes require restart
//! - Graceful shutdown waits for active sessions
//!
//! ## Last Modified
//! v0.1.0 - Initial server library

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod plugins;
pub mod server;
pub mod services;

// Re-export primary types
pub use config::ProxyConfig;
pub use error::{Result, ServerError};
pub use handlers::{Listen, PacketContext};
pub use plugins::Plugin;
pub use server::Server;
pub use services::{ProxyContext, Session, SessionManager};
