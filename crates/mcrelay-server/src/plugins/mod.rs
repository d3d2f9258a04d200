// ============================================
// File: crates/mcrelay-server/src/plugins/mod.rs
// ============================================
//! # Plugins
//!
//! ## Creation Reason
//! All proxy behavior beyond plain forwarding is a plugin: a set of
//! packet listeners and event subscriptions registered once at startup.
//! The handshake, status and login behaviors ship as built-in plugins.
//!
//! ## Main Functionality
//! - `Plugin`: registration trait
//! - `default_plugins`: built-ins, in registration order
//! - `assemble`: builds the frozen registry and event bus
//!
//! ## Registration Order
//! ```text
//! HandshakePlugin ─► StatusPlugin ─► LoginPlugin ─► user plugins...
//! ```
//! Entries registered later for the same key run after earlier ones
//! unless they use `replacing()`.
//!
//! ## Last Modified
//! v0.1.0 - Initial plugin set

mod handshake;
mod login;
mod status;

pub use handshake::HandshakePlugin;
pub use login::LoginPlugin;
pub use status::StatusPlugin;

use tracing::debug;

use crate::handlers::{EventBus, EventBusBuilder, ListenerRegistry, ListenerRegistryBuilder};

/// A bundle of listeners and event subscriptions.
pub trait Plugin: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Adds the plugin's listeners and subscriptions.
    fn register(&self, listeners: &mut ListenerRegistryBuilder, events: &mut EventBusBuilder);
}

/// Built-in plugins in registration order.
#[must_use]
pub fn default_plugins() -> Vec<Box<dyn Plugin>> {
    vec![
        Box::new(HandshakePlugin),
        Box::new(StatusPlugin),
        Box::new(LoginPlugin),
    ]
}

/// Registers the built-ins, then `extra`, and freezes the result.
#[must_use]
pub fn assemble(extra: &[Box<dyn Plugin>]) -> (ListenerRegistry, EventBus) {
    let mut listeners = ListenerRegistryBuilder::new();
    let mut events = EventBusBuilder::new();

    for plugin in default_plugins().iter().chain(extra) {
        debug!(plugin = plugin.name(), "Registering plugin");
        plugin.register(&mut listeners, &mut events);
    }

    (listeners.build(), events.build())
}
