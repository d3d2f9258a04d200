// ============================================
// File: crates/mcrelay-server/src/handlers/events.rs
// ============================================
//! # Event Bus
//!
//! ## Creation Reason
//! Named, wire-less events let plugins talk to each other and observe
//! the engine (`close`, `login_success`, `transfer`, `handler_error`,
//! `peer_spawned`, `peer_retired`).
//!
//! ## Main Functionality
//! - `EventHandler`: async handler returning a JSON value
//! - `EventBusBuilder::subscribe` / `EventBus::emit`
//! - Subscriptions are regex patterns matched against the whole name
//!
//! ```text
//! subscribe("close", ..)            matches "close" only
//! subscribe("chat:server:.*", ..)   matches "chat:server:join", ...
//! emit(name) ─► every matching subscription, in registration order
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - A pattern that does not compile is matched literally (and logged)
//! - A failing handler yields `Value::Null` so result positions line
//!   up with registration order
//!
//! ## Last Modified
//! v0.1.0 - Initial event bus

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::Result;
use crate::services::session::Session;

// ============================================
// Event
// ============================================

/// An emitted event.
#[derive(Clone)]
pub struct Event {
    /// Event name.
    pub name: String,
    /// Event payload.
    pub data: Value,
    /// Session the event concerns, if any.
    pub session: Option<Arc<Session>>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("data", &self.data)
            .field("session_id", &self.session.as_ref().map(|s| s.id))
            .finish()
    }
}

// ============================================
// EventHandler
// ============================================

/// Event subscriber.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one event and returns a result value for the emitter.
    ///
    /// # Errors
    /// Errors are logged by the bus and reported as `Value::Null`.
    async fn on_event(&self, event: Event) -> Result<Value>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnEventHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    async fn on_event(&self, event: Event) -> Result<Value> {
        (self.0)(event).await
    }
}

/// Wraps `f` as an [`EventHandler`].
pub fn event_fn<F, Fut>(f: F) -> FnEventHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    FnEventHandler(f)
}

// ============================================
// EventBus
// ============================================

/// Collects subscriptions in order.
#[derive(Default)]
pub struct EventBusBuilder {
    subscriptions: Vec<(String, Arc<dyn EventHandler>)>,
}

impl EventBusBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `handler` to every event whose whole name matches
    /// the regex `pattern`. A plain name subscribes to that name only.
    pub fn subscribe(&mut self, pattern: impl Into<String>, handler: impl EventHandler) -> &mut Self {
        self.subscriptions.push((pattern.into(), Arc::new(handler)));
        self
    }

    /// Compiles the patterns and freezes the subscriptions.
    #[must_use]
    pub fn build(self) -> EventBus {
        let subscriptions = self
            .subscriptions
            .into_iter()
            .map(|(pattern, handler)| Subscription {
                matcher: compile_pattern(&pattern),
                pattern,
                handler,
            })
            .collect();
        EventBus { subscriptions }
    }
}

/// Whole-name matcher for one subscription.
enum Matcher {
    Pattern(Regex),
    Literal(String),
}

impl Matcher {
    fn is_match(&self, name: &str) -> bool {
        match self {
            Self::Pattern(regex) => regex.is_match(name),
            Self::Literal(literal) => literal == name,
        }
    }
}

/// Anchors `pattern` so it must match the whole event name.
fn compile_pattern(pattern: &str) -> Matcher {
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(regex) => Matcher::Pattern(regex),
        Err(e) => {
            warn!(pattern, error = %e, "Invalid event pattern, matching literally");
            Matcher::Literal(pattern.to_string())
        }
    }
}

struct Subscription {
    pattern: String,
    matcher: Matcher,
    handler: Arc<dyn EventHandler>,
}

/// Immutable subscription table.
#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
}

impl EventBus {
    /// Runs every subscriber whose pattern matches `name`, in
    /// registration order, and collects the results.
    pub async fn emit(&self, name: &str, data: Value, session: Option<Arc<Session>>) -> Vec<Value> {
        let handlers: Vec<&Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.matcher.is_match(name))
            .collect();
        if handlers.is_empty() {
            trace!(event = name, "No subscribers");
            return Vec::new();
        }

        let event = Event {
            name: name.to_string(),
            data,
            session,
        };

        let mut results = Vec::with_capacity(handlers.len());
        for subscription in handlers {
            match subscription.handler.on_event(event.clone()).await {
                Ok(value) => results.push(value),
                Err(e) => {
                    warn!(
                        event = name,
                        pattern = %subscription.pattern,
                        error = %e,
                        "Event handler failed"
                    );
                    results.push(Value::Null);
                }
            }
        }
        results
    }

    /// Returns `true` if at least one subscription matches `name`.
    #[must_use]
    pub fn has_subscribers(&self, name: &str) -> bool {
        self.subscriptions.iter().any(|s| s.matcher.is_match(name))
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field(
                "patterns",
                &self.subscriptions.iter().map(|s| s.pattern.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ============================================
// Tests
// ============================================
