// ============================================
// File: crates/mcrelay-server/src/handlers/mod.rs
// ============================================
//! # Packet and Event Handlers
//!
//! ## Creation Reason
//! Defines the plugin-facing interception surface: packet listeners
//! keyed by `(id, phase, direction)` and named events.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`registry`]: listener registrations and dispatch policies
//! - [`context`]: per-packet handle passed to listeners
//! - [`events`]: named event bus
//!
//! ## Handler Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Session loop                         │
//! │                                                             │
//! │   Packet ──► ListenerRegistry::lookup(id, phase, dir)       │
//! │                 │                                           │
//! │        ┌────────┴─────────┐                                 │
//! │        ▼                  ▼                                 │
//! │   no entries        chain of ListenerEntry                  │
//! │   forward as-is     Blocking ─► await                       │
//! │                     Detached ─► spawn                       │
//! │                         │                                   │
//! │                         ▼                                   │
//! │                  PacketContext outcome ──► forward / drop   │
//! │                                                             │
//! │   Handlers ──► EventBus::emit(name, data) ──► Vec<Value>    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Blocking handlers hold up their leg's read loop, keep them short
//! - Registration happens once, before the first session opens
//!
//! ## Last Modified
//! v0.1.0 - Initial handlers structure

pub mod context;
pub mod events;
pub mod registry;

pub use context::PacketContext;
pub use events::{event_fn, Event, EventBus, EventBusBuilder, EventHandler};
pub use registry::{
    handler_fn, DispatchMode, FailurePolicy, ForwardPolicy, Listen, ListenerEntry, ListenerKey,
    ListenerRegistry, ListenerRegistryBuilder, PacketHandler,
};
