// ============================================
// File: crates/mcrelay-server/src/handlers/registry.rs
// ============================================
//! # Listener Registry
//!
//! ## Creation Reason
//! Plugins intercept packets by registering listeners keyed by
//! `(packet id, phase, direction)`. The registry is assembled once at
//! startup and shared read-only by every session.
//!
//! ## Main Functionality
//! - `Listen`: registration builder (`Listen::client(0x00, Phase::Login)`)
//! - `PacketHandler`: async handler trait, `handler_fn` for closures
//! - `ListenerRegistryBuilder` / `ListenerRegistry`
//! - `DispatchMode`, `ForwardPolicy`, `FailurePolicy`
//!
//! ## Dispatch Chain
//! ```text
//! (id, phase, direction) ──► [entry 1] ──► [entry 2] ──► ... ──► forward?
//!                              │              │
//!                         Blocking: awaited   Detached: spawned
//! ```
//! Entries run in registration order. Built-in plugins register first,
//! so user plugins run after them unless they register with
//! `replacing()`, which drops every earlier entry for the key.
//!
//! ## ⚠️ Important Note for Next Developer
//! - The registry is immutable after `build()`
//! - Forwarding is decided per chain, not per entry: one `forwarding()`
//!   entry is enough to forward an unconsumed packet
//!
//! ## Last Modified
//! v0.1.0 - Initial listener registry

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mcrelay_common::Direction;
use mcrelay_core::protocol::Phase;

use crate::error::Result;
use crate::handlers::context::PacketContext;

// ============================================
// Policies
// ============================================

/// How a listener runs relative to the session's read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Awaited before the next packet of the leg is read.
    #[default]
    Blocking,
    /// Spawned into the session's task set; the loop does not wait.
    Detached,
}

/// Whether a chain forwards the packet once it has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardPolicy {
    /// Forward unless a handler consumed the packet.
    Forward,
    /// Do not forward on behalf of this entry.
    #[default]
    Suppress,
}

/// What happens to a packet whose Blocking handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Forward as if the chain had succeeded: only when some entry is
    /// forwarding, with any rewrite made before the failure.
    #[default]
    Forward,
    /// Drop the packet even if some entry is forwarding.
    Drop,
}

// ============================================
// ListenerKey / Listen
// ============================================

/// Dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    /// Packet id.
    pub id: u32,
    /// Phase of the receiving leg.
    pub phase: Phase,
    /// Side that sent the packet.
    pub direction: Direction,
}

impl ListenerKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(id: u32, phase: Phase, direction: Direction) -> Self {
        Self {
            id,
            phase,
            direction,
        }
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/0x{:02x}", self.direction, self.phase, self.id)
    }
}

/// Registration builder.
///
/// # Example
/// ```
/// use mcrelay_core::protocol::Phase;
/// use mcrelay_server::handlers::Listen;
///
/// let listen = Listen::server(0x02, Phase::Play).detached().forwarding().named("chat-log");
/// assert_eq!(listen.key().id, 0x02);
/// ```
#[derive(Debug, Clone)]
pub struct Listen {
    key: ListenerKey,
    mode: DispatchMode,
    forward: ForwardPolicy,
    replace: bool,
    name: Option<String>,
}

impl Listen {
    /// Listens for packets sent by the client.
    #[must_use]
    pub const fn client(id: u32, phase: Phase) -> Self {
        Self::new(ListenerKey::new(id, phase, Direction::Client))
    }

    /// Listens for packets sent by the server.
    #[must_use]
    pub const fn server(id: u32, phase: Phase) -> Self {
        Self::new(ListenerKey::new(id, phase, Direction::Server))
    }

    const fn new(key: ListenerKey) -> Self {
        Self {
            key,
            mode: DispatchMode::Blocking,
            forward: ForwardPolicy::Suppress,
            replace: false,
            name: None,
        }
    }

    /// Runs the handler before the next read (default).
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.mode = DispatchMode::Blocking;
        self
    }

    /// Runs the handler concurrently with the read loop.
    #[must_use]
    pub fn detached(mut self) -> Self {
        self.mode = DispatchMode::Detached;
        self
    }

    /// Forwards the packet after the chain unless it was consumed.
    #[must_use]
    pub fn forwarding(mut self) -> Self {
        self.forward = ForwardPolicy::Forward;
        self
    }

    /// Drops every entry registered earlier for the same key.
    #[must_use]
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }

    /// Names the entry for logs and `handler_error` events.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The dispatch key.
    #[must_use]
    pub const fn key(&self) -> ListenerKey {
        self.key
    }
}

// ============================================
// PacketHandler
// ============================================

/// Packet listener.
///
/// Handlers must not assume exclusive access to session state across an
/// `.await`: Detached handlers of the same session may interleave.
#[async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    /// Handles one packet.
    ///
    /// # Errors
    /// Any error aborts the rest of the chain for this packet only.
    async fn handle(&self, ctx: PacketContext) -> Result<()>;
}

/// Adapter turning an async closure into a [`PacketHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> PacketHandler for FnHandler<F>
where
    F: Fn(PacketContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: PacketContext) -> Result<()> {
        (self.0)(ctx).await
    }
}

/// Wraps `f` as a [`PacketHandler`].
///
/// ```ignore
/// builder.on(Listen::client(0x01, Phase::Play), handler_fn(|ctx| async move {
///     ctx.consume();
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(PacketContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnHandler(f)
}

// ============================================
// ListenerEntry
// ============================================

/// One registered listener.
#[derive(Clone)]
pub struct ListenerEntry {
    /// Name used in logs.
    pub name: String,
    /// Blocking or Detached.
    pub mode: DispatchMode,
    /// Forwarding contribution.
    pub forward: ForwardPolicy,
    /// The handler.
    pub handler: Arc<dyn PacketHandler>,
}

impl fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("forward", &self.forward)
            .finish_non_exhaustive()
    }
}

// ============================================
// ListenerRegistryBuilder
// ============================================

/// Collects registrations in order.
#[derive(Default)]
pub struct ListenerRegistryBuilder {
    entries: HashMap<ListenerKey, Vec<ListenerEntry>>,
}

impl ListenerRegistryBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `listen`.
    pub fn on(&mut self, listen: Listen, handler: impl PacketHandler) -> &mut Self {
        self.on_shared(listen, Arc::new(handler))
    }

    /// Registers an already shared handler.
    pub fn on_shared(&mut self, listen: Listen, handler: Arc<dyn PacketHandler>) -> &mut Self {
        let Listen {
            key,
            mode,
            forward,
            replace,
            name,
        } = listen;

        let chain = self.entries.entry(key).or_default();
        if replace && !chain.is_empty() {
            debug!(key = %key, replaced = chain.len(), "Listener registration replaces earlier entries");
            chain.clear();
        }

        let name = name.unwrap_or_else(|| format!("{key}#{}", chain.len()));
        chain.push(ListenerEntry {
            name,
            mode,
            forward,
            handler,
        });
        self
    }

    /// Freezes the registrations.
    #[must_use]
    pub fn build(self) -> ListenerRegistry {
        ListenerRegistry {
            entries: self.entries,
        }
    }
}

impl fmt::Debug for ListenerRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistryBuilder")
            .field("keys", &self.entries.len())
            .finish()
    }
}

// ============================================
// ListenerRegistry
// ============================================

/// Immutable listener table.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: HashMap<ListenerKey, Vec<ListenerEntry>>,
}

impl ListenerRegistry {
    /// Returns the chain for `key`, if any.
    #[must_use]
    pub fn lookup(&self, key: &ListenerKey) -> Option<&[ListenerEntry]> {
        self.entries
            .get(key)
            .map(Vec::as_slice)
            .filter(|chain| !chain.is_empty())
    }

    /// Number of registered entries across all keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("keys", &self.entries.len())
            .field("entries", &self.len())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> impl PacketHandler {
        handler_fn(|_ctx| async { Ok(()) })
    }

    #[test]
    fn test_registration_order_and_defaults() {
        let mut builder = ListenerRegistryBuilder::new();
        builder
            .on(Listen::client(0x01, Phase::Play).named("first"), noop())
            .on(Listen::client(0x01, Phase::Play).detached().forwarding(), noop());
        let registry = builder.build();

        let chain = registry
            .lookup(&ListenerKey::new(0x01, Phase::Play, Direction::Client))
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name, "first");
        assert_eq!(chain[0].mode, DispatchMode::Blocking);
        assert_eq!(chain[0].forward, ForwardPolicy::Suppress);
        assert_eq!(chain[1].mode, DispatchMode::Detached);
        assert_eq!(chain[1].forward, ForwardPolicy::Forward);
        assert_eq!(chain[1].name, "client/Play/0x01#1");
    }

    #[test]
    fn test_key_includes_phase_and_direction() {
        let mut builder = ListenerRegistryBuilder::new();
        builder.on(Listen::server(0x00, Phase::Login), noop());
        let registry = builder.build();

        assert!(registry
            .lookup(&ListenerKey::new(0x00, Phase::Login, Direction::Server))
            .is_some());
        assert!(registry
            .lookup(&ListenerKey::new(0x00, Phase::Login, Direction::Client))
            .is_none());
        assert!(registry
            .lookup(&ListenerKey::new(0x00, Phase::Play, Direction::Server))
            .is_none());
    }

    #[test]
    fn test_replacing_clears_earlier_entries() {
        let mut builder = ListenerRegistryBuilder::new();
        builder
            .on(Listen::client(0x00, Phase::Login).named("builtin"), noop())
            .on(Listen::client(0x00, Phase::Login).named("also"), noop())
            .on(Listen::client(0x00, Phase::Login).replacing().named("override"), noop())
            .on(Listen::client(0x00, Phase::Login).named("after"), noop());
        let registry = builder.build();

        let names: Vec<_> = registry
            .lookup(&ListenerKey::new(0x00, Phase::Login, Direction::Client))
            .unwrap()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, ["override", "after"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_failure_policy_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: FailurePolicy,
        }
        let parsed: Wrapper = toml::from_str("policy = \"drop\"").unwrap();
        assert_eq!(parsed.policy, FailurePolicy::Drop);
        assert_eq!(FailurePolicy::default(), FailurePolicy::Forward);
    }
}
