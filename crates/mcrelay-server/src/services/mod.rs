// ============================================
// File: crates/mcrelay-server/src/services/mod.rs
// ============================================
//! # Proxy Services
//!
//! ## Creation Reason
//! Session-level logic of the proxy, kept apart from wire framing
//! (`mcrelay-core`) and byte streams (`mcrelay-transport`).
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`session`]: session lifecycle, dispatch loops, session manager
//! - [`handshake`]: backend login for transfers and peers
//! - [`broadcast`]: broadcast peers mirroring a primary session
//!
//! ## Service Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Service Layer                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────────┐      ┌────────────────────────────┐   │
//! │  │  SessionManager  │─────►│          Session           │   │
//! │  │  - limit         │      │  - client leg + loop       │   │
//! │  │  - close_all     │      │  - server leg + loop       │   │
//! │  └──────────────────┘      │  - transfer_to / close     │   │
//! │                            └──────┬──────────────┬──────┘   │
//! │                                   │              │          │
//! │                    ┌──────────────▼───┐   ┌──────▼───────┐  │
//! │                    │  backend_login   │◄──│ BroadcastHub │  │
//! │                    │  (handshake.rs)  │   │  peers       │  │
//! │                    └──────────────────┘   └──────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Closing a session retires its peers before its legs shut down
//!
//! ## Last Modified
//! v0.1.0 - Initial services structure

pub mod broadcast;
pub mod handshake;
pub mod session;

pub use broadcast::{BroadcastHub, BroadcastPeer, MirrorDirection, PeerOptions};
pub use handshake::{backend_login, Authenticator, BackendLogin, EncryptionAnswer, LoginProfile};
pub use session::{
    ProxyContext, ProxyContextBuilder, Session, SessionManager, SessionStats, StatsSnapshot,
};
