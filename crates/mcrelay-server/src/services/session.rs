// ============================================
// File: crates/mcrelay-server/src/services/session.rs
// ============================================
//! # Session Management Service
//!
//! ## Creation Reason
//! A session pairs one client leg with at most one current server leg
//! and runs the dispatch loop for each. It owns the session-level
//! operations plugins call: close, transfer, broadcast peers and sends.
//!
//! ## Main Functionality
//! - `ProxyContext`: shared, read-only proxy environment
//! - `Session`: legs, read loops, dispatch, lifecycle
//! - `SessionStats`: lock-free counters
//! - `SessionManager`: live sessions, limit enforcement
//!
//! ## Session Lifecycle
//! ```text
//! ┌──────────┐  accept   ┌─────────────┐  LoginStart   ┌──────────────┐
//! │  (none)  │ ────────► │ client only │ ────────────► │ client+server│
//! └──────────┘           └──────┬──────┘ connect_backend└──────┬───────┘
//!                               │                              │ transfer_to
//!                               │                              ▼ (swap leg)
//!                               │      EOF / error / close()   │
//!                               └──────────────┬───────────────┘
//!                                              ▼
//!                                        ┌──────────┐
//!                                        │  Closed  │
//!                                        └──────────┘
//! ```
//!
//! ## Dispatch (per packet, per leg)
//! ```text
//! read ─► phase check ─► stats ─► hub.mirror ─► registry.lookup
//!   none  ─► forward as-is
//!   chain ─► Blocking: await in order (failure stops the chain)
//!            Detached: spawn into the session task tracker
//!         ─► consumed? drop : failed? FailurePolicy : any forwarding()? forward
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Loops observe cancellation only while waiting for the next frame. A
//!   Blocking handler that is running when the session closes finishes,
//!   but its writes fail with `LegClosed`.
//! - `close` runs its teardown on a separate task, so a Detached
//!   handler calling `close` cannot cut its own teardown short
//! - The server leg is swapped under a sync lock; never hold it across
//!   an `.await`
//!
//! ## Last Modified
//! v0.1.0 - Initial session management

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use mcrelay_common::time::AtomicInstant;
use mcrelay_common::{BackendAddr, Direction, SessionId};
use mcrelay_core::protocol::login::{disconnect_packet, ids, Handshake, PROTOCOL_VERSION};
use mcrelay_core::protocol::{Packet, Phase};
use mcrelay_transport::{BoxedStream, Connector, Leg, LegReader, TcpConnector};

use crate::config::ProxyConfig;
use crate::error::{Result, ServerError};
use crate::handlers::{
    DispatchMode, EventBus, FailurePolicy, ForwardPolicy, ListenerEntry, ListenerKey,
    ListenerRegistry, PacketContext,
};
use crate::plugins::{self, Plugin};
use crate::services::broadcast::{BroadcastHub, BroadcastPeer, PeerOptions};
use crate::services::handshake::{backend_login, Authenticator, BackendLogin, LoginProfile};

// ============================================
// ProxyContext
// ============================================

/// Everything a session needs from the proxy, shared read-only.
pub struct ProxyContext {
    /// Proxy configuration.
    pub config: Arc<ProxyConfig>,
    /// Packet listeners.
    pub registry: Arc<ListenerRegistry>,
    /// Event subscribers.
    pub events: Arc<EventBus>,
    /// Opens backend streams.
    pub connector: Arc<dyn Connector>,
    /// Answers backend encryption requests, if configured.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Broadcast peers of all sessions.
    pub hub: Arc<BroadcastHub>,
}

impl ProxyContext {
    /// Starts building a context.
    #[must_use]
    pub fn builder(config: ProxyConfig) -> ProxyContextBuilder {
        ProxyContextBuilder {
            config,
            plugins: Vec::new(),
            connector: None,
            authenticator: None,
        }
    }
}

impl fmt::Debug for ProxyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyContext")
            .field("backend", &self.config.backend())
            .field("registry", &self.registry)
            .field("events", &self.events)
            .field("authenticator", &self.authenticator.is_some())
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ProxyContext`].
///
/// Built-in plugins are always registered first; plugins added here
/// follow in the order given.
pub struct ProxyContextBuilder {
    config: ProxyConfig,
    plugins: Vec<Box<dyn Plugin>>,
    connector: Option<Arc<dyn Connector>>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl ProxyContextBuilder {
    /// Adds a plugin after the built-ins.
    #[must_use]
    pub fn plugin(mut self, plugin: impl Plugin) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// Replaces the TCP connector.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the authenticator for online-mode backends.
    #[must_use]
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Assembles the registry and event bus and freezes the context.
    #[must_use]
    pub fn build(self) -> ProxyContext {
        let (registry, events) = plugins::assemble(&self.plugins);
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TcpConnector::new(self.config.handshake_timeout())));

        info!(
            plugins = self.plugins.len(),
            listeners = registry.len(),
            "Proxy context built"
        );

        ProxyContext {
            config: Arc::new(self.config),
            registry: Arc::new(registry),
            events: Arc::new(events),
            connector,
            authenticator: self.authenticator,
            hub: Arc::new(BroadcastHub::new()),
        }
    }
}

impl fmt::Debug for ProxyContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyContextBuilder")
            .field("plugins", &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// ============================================
// Session Stats
// ============================================

/// Per-session counters.
#[derive(Debug, Default)]
pub struct SessionStats {
    packets_from_client: AtomicU64,
    packets_from_server: AtomicU64,
    bytes_from_client: AtomicU64,
    bytes_from_server: AtomicU64,
    packets_forwarded: AtomicU64,
    handler_failures: AtomicU64,
    transfers: AtomicU64,
}

impl SessionStats {
    /// Records a packet read from `from`.
    pub fn record_in(&self, from: Direction, bytes: usize) {
        let bytes = bytes as u64;
        match from {
            Direction::Client => {
                self.packets_from_client.fetch_add(1, Ordering::Relaxed);
                self.bytes_from_client.fetch_add(bytes, Ordering::Relaxed);
            }
            Direction::Server => {
                self.packets_from_server.fetch_add(1, Ordering::Relaxed);
                self.bytes_from_server.fetch_add(bytes, Ordering::Relaxed);
            }
        }
    }

    /// Records a forwarded packet.
    pub fn record_forwarded(&self) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed handler.
    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a completed transfer.
    pub fn record_transfer(&self) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_from_client: self.packets_from_client.load(Ordering::Relaxed),
            packets_from_server: self.packets_from_server.load(Ordering::Relaxed),
            bytes_from_client: self.bytes_from_client.load(Ordering::Relaxed),
            bytes_from_server: self.bytes_from_server.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            transfers: self.transfers.load(Ordering::Relaxed),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_from_client: u64,
    pub packets_from_server: u64,
    pub bytes_from_client: u64,
    pub bytes_from_server: u64,
    pub packets_forwarded: u64,
    pub handler_failures: u64,
    pub transfers: u64,
}

// ============================================
// Session
// ============================================

struct ServerSide {
    leg: Arc<Leg>,
    stop: CancellationToken,
}

/// One proxied client connection.
pub struct Session {
    /// Session id.
    pub id: SessionId,
    /// Client peer label (usually the socket address).
    pub peer: String,
    /// Creation time.
    pub created_at: Instant,
    /// Last packet seen on any leg.
    pub last_activity: AtomicInstant,
    /// Counters.
    pub stats: SessionStats,
    ctx: Arc<ProxyContext>,
    client: Arc<Leg>,
    server: RwLock<Option<ServerSide>>,
    backend: RwLock<BackendAddr>,
    protocol_version: AtomicI32,
    username: RwLock<Option<String>>,
    open: AtomicBool,
    /// Stops loops and Detached handlers.
    cancel: CancellationToken,
    /// Fired once teardown has finished.
    finished: CancellationToken,
    tasks: TaskTracker,
}

impl Session {
    /// Wraps an accepted client stream and starts its read loop.
    ///
    /// The server leg is created later, by `connect_backend`.
    #[must_use]
    pub fn open(ctx: Arc<ProxyContext>, stream: BoxedStream, peer: impl Into<String>) -> Arc<Self> {
        let peer = peer.into();
        let (client, reader) = Leg::open(
            stream,
            Direction::Client,
            ctx.config.protocol.max_frame_len,
            peer.clone(),
        );
        let now = Instant::now();

        let session = Arc::new(Self {
            id: SessionId::generate(),
            peer,
            created_at: now,
            last_activity: AtomicInstant::from_instant(now),
            stats: SessionStats::default(),
            backend: RwLock::new(ctx.config.backend()),
            ctx,
            client,
            server: RwLock::new(None),
            protocol_version: AtomicI32::new(PROTOCOL_VERSION),
            username: RwLock::new(None),
            open: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            tasks: TaskTracker::new(),
        });

        tokio::spawn(Arc::clone(&session).run_loop(reader, session.cancel.clone()));
        debug!(session_id = %session.id, peer = %session.peer, "Session opened");
        session
    }

    // ========================================
    // Accessors
    // ========================================

    /// The shared proxy context.
    #[must_use]
    pub fn context(&self) -> &ProxyContext {
        &self.ctx
    }

    /// Returns `true` until `close` is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// The client-facing leg.
    #[must_use]
    pub fn client_leg(&self) -> &Arc<Leg> {
        &self.client
    }

    /// The current server leg, if connected.
    #[must_use]
    pub fn server_leg(&self) -> Option<Arc<Leg>> {
        self.server.read().as_ref().map(|s| Arc::clone(&s.leg))
    }

    /// The leg facing `side`.
    #[must_use]
    pub fn leg(&self, side: Direction) -> Option<Arc<Leg>> {
        match side {
            Direction::Client => Some(Arc::clone(&self.client)),
            Direction::Server => self.server_leg(),
        }
    }

    /// Phase of the leg facing `side`.
    #[must_use]
    pub fn phase(&self, side: Direction) -> Option<Phase> {
        self.leg(side).map(|leg| leg.phase())
    }

    /// Advances the phase of the leg facing `side`.
    ///
    /// # Errors
    /// `NoServerLeg`, or `InvalidTransition` for an illegal move.
    pub fn advance_phase(&self, side: Direction, to: Phase) -> Result<()> {
        let leg = self
            .leg(side)
            .ok_or_else(|| ServerError::NoServerLeg(self.id))?;
        leg.advance(to)?;
        Ok(())
    }

    /// Backend the session is (or will be) connected to.
    #[must_use]
    pub fn backend(&self) -> BackendAddr {
        self.backend.read().clone()
    }

    /// Address written into handshakes sent to `backend`.
    #[must_use]
    pub fn reported_addr(&self, backend: &BackendAddr) -> BackendAddr {
        self.ctx
            .config
            .network
            .spoof
            .clone()
            .unwrap_or_else(|| backend.clone())
    }

    /// Protocol version from the client's handshake.
    #[must_use]
    pub fn protocol_version(&self) -> i32 {
        self.protocol_version.load(Ordering::Relaxed)
    }

    /// Stores the client's protocol version.
    pub fn set_protocol_version(&self, version: i32) {
        self.protocol_version.store(version, Ordering::Relaxed);
    }

    /// Stores the client's username.
    pub fn set_username(&self, username: impl Into<String>) {
        *self.username.write() = Some(username.into());
    }

    /// Identity replayed on new backend legs, once the client sent
    /// its login start.
    #[must_use]
    pub fn profile(&self) -> Option<LoginProfile> {
        self.username.read().clone().map(|username| LoginProfile {
            protocol_version: self.protocol_version(),
            username,
        })
    }

    /// Updates the activity timestamp.
    pub fn touch(&self) {
        self.last_activity.store(Instant::now());
    }

    /// Time since the last packet.
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    // ========================================
    // Sending / Events
    // ========================================

    /// Writes a packet to the leg facing `to`.
    ///
    /// # Errors
    /// `NoServerLeg` before the backend is connected; transport errors.
    pub async fn send(&self, to: Direction, id: u32, payload: &[u8]) -> Result<()> {
        let leg = self
            .leg(to)
            .ok_or_else(|| ServerError::NoServerLeg(self.id))?;
        leg.send(id, payload).await?;
        Ok(())
    }

    /// Writes a packet to the client.
    ///
    /// # Errors
    /// Transport errors.
    pub async fn send_to_client(&self, id: u32, payload: &[u8]) -> Result<()> {
        self.send(Direction::Client, id, payload).await
    }

    /// Writes a packet to the backend.
    ///
    /// # Errors
    /// `NoServerLeg` before the backend is connected; transport errors.
    pub async fn send_to_server(&self, id: u32, payload: &[u8]) -> Result<()> {
        self.send(Direction::Server, id, payload).await
    }

    /// Emits an event concerning this session.
    pub async fn emit(self: &Arc<Self>, name: &str, data: Value) -> Vec<Value> {
        self.ctx
            .events
            .emit(name, data, Some(Arc::clone(self)))
            .await
    }

    // ========================================
    // Backend Connection
    // ========================================

    /// Connects the first server leg and sends the handshake.
    ///
    /// The leg is left in Login; the client's login start is forwarded
    /// by the caller's chain.
    ///
    /// # Errors
    /// `SessionClosed`, `InvalidState` if already connected, connect and
    /// transport errors.
    pub async fn connect_backend(self: &Arc<Self>) -> Result<Arc<Leg>> {
        if !self.is_open() {
            return Err(ServerError::SessionClosed(self.id));
        }
        if self.server_leg().is_some() {
            return Err(ServerError::invalid_state("backend already connected"));
        }

        let backend = self.backend();
        let reported = self.reported_addr(&backend);
        let stream = self.ctx.connector.connect(&backend).await?;
        let (leg, reader) = Leg::open(
            stream,
            Direction::Server,
            self.ctx.config.protocol.max_frame_len,
            backend.to_string(),
        );

        let handshake = Handshake {
            protocol_version: self.protocol_version(),
            server_address: reported.host.clone(),
            server_port: reported.port,
            next_phase: Phase::Login,
        };
        leg.send(ids::HANDSHAKE, &handshake.encode()).await?;
        leg.advance(Phase::Login)?;

        if let Some(old) = self.install_server(Arc::clone(&leg), reader) {
            old.stop.cancel();
            old.leg.shutdown().await;
        }
        if !self.is_open() {
            leg.shutdown().await;
            return Err(ServerError::SessionClosed(self.id));
        }

        info!(
            session_id = %self.id,
            backend = %backend,
            reported = %reported,
            "Backend connected"
        );
        Ok(leg)
    }

    /// Moves the session to another backend.
    ///
    /// On failure the current server leg is untouched.
    ///
    /// # Errors
    /// `SessionClosed`, `InvalidState` before login, and the recoverable
    /// backend login errors (`HandshakeTimeout`, `BackendRejected`,
    /// `AuthenticationUnavailable`, connect errors).
    pub async fn transfer_to(self: &Arc<Self>, addr: BackendAddr) -> Result<()> {
        if !self.is_open() {
            return Err(ServerError::SessionClosed(self.id));
        }
        let profile = self
            .profile()
            .ok_or_else(|| ServerError::invalid_state("session has not logged in"))?;

        let from = self.backend();
        let reported = self.reported_addr(&addr);
        info!(session_id = %self.id, from = %from, to = %addr, "Transferring session");

        let BackendLogin { leg, reader, .. } =
            match backend_login(&self.ctx, &addr, &reported, &profile).await {
                Ok(login) => login,
                Err(e) => {
                    warn!(
                        session_id = %self.id,
                        to = %addr,
                        error = %e,
                        "Transfer failed, keeping current backend"
                    );
                    return Err(e);
                }
            };

        if let Some(old) = self.install_server(Arc::clone(&leg), reader) {
            old.stop.cancel();
            old.leg.shutdown().await;
        }
        if !self.is_open() {
            leg.shutdown().await;
            return Err(ServerError::SessionClosed(self.id));
        }

        *self.backend.write() = addr.clone();
        self.stats.record_transfer();
        info!(session_id = %self.id, backend = %addr, "Session transferred");

        self.emit(
            "transfer",
            json!({ "from": from.to_string(), "to": addr.to_string() }),
        )
        .await;
        Ok(())
    }

    fn install_server(self: &Arc<Self>, leg: Arc<Leg>, reader: LegReader) -> Option<ServerSide> {
        let stop = self.cancel.child_token();
        let old = self.server.write().replace(ServerSide {
            leg,
            stop: stop.clone(),
        });
        tokio::spawn(Arc::clone(self).run_loop(reader, stop));
        old
    }

    // ========================================
    // Broadcast Peers
    // ========================================

    /// Spawns a broadcast peer with the configured options.
    ///
    /// # Errors
    /// See [`BroadcastHub::spawn_peer`].
    pub async fn spawn_peer(self: &Arc<Self>) -> Result<Arc<BroadcastPeer>> {
        let options = PeerOptions::from_config(&self.ctx.config.broadcast);
        self.spawn_peer_with(options).await
    }

    /// Spawns a broadcast peer with explicit options.
    ///
    /// # Errors
    /// See [`BroadcastHub::spawn_peer`].
    pub async fn spawn_peer_with(self: &Arc<Self>, options: PeerOptions) -> Result<Arc<BroadcastPeer>> {
        self.ctx.hub.spawn_peer(self, options).await
    }

    /// Retires one of this session's peers. Idempotent.
    pub async fn retire_peer(&self, peer: &Arc<BroadcastPeer>) {
        self.ctx.hub.retire_peer(peer).await;
    }

    /// Live peers of this session.
    #[must_use]
    pub fn peers(&self) -> Vec<Arc<BroadcastPeer>> {
        self.ctx.hub.peers(&self.id)
    }

    // ========================================
    // Close
    // ========================================

    /// Closes the session. Only the first call has any effect.
    ///
    /// With `force == false` the client is sent a disconnect notice
    /// carrying `reason` when its leg is in Login or Play.
    pub async fn close(self: &Arc<Self>, reason: impl Into<String>, force: bool) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        let reason = reason.into();
        let session = Arc::clone(self);

        let teardown = tokio::spawn(async move { session.teardown(reason, force).await });
        if let Err(e) = teardown.await {
            warn!(session_id = %self.id, error = %e, "Session teardown task failed");
        }
    }

    /// Resolves once the session is closed and torn down.
    pub async fn closed(&self) {
        self.finished.cancelled().await;
    }

    async fn teardown(self: Arc<Self>, reason: String, force: bool) {
        self.cancel.cancel();
        self.tasks.close();

        self.ctx.hub.retire_all(&self.id).await;
        self.emit("close", json!(reason)).await;

        if !force {
            if let Some((id, payload)) = disconnect_packet(self.client.phase(), &reason) {
                if let Err(e) = self.client.send(id, &payload).await {
                    debug!(session_id = %self.id, error = %e, "Disconnect notice not delivered");
                }
            }
        }

        let server = self.server.write().take();
        if let Some(server) = server {
            server.stop.cancel();
            server.leg.shutdown().await;
        }
        self.client.shutdown().await;

        let stats = self.stats.snapshot();
        info!(
            session_id = %self.id,
            peer = %self.peer,
            reason = %reason,
            duration_secs = self.created_at.elapsed().as_secs(),
            packets_from_client = stats.packets_from_client,
            packets_from_server = stats.packets_from_server,
            packets_forwarded = stats.packets_forwarded,
            handler_failures = stats.handler_failures,
            "Session closed"
        );
        self.finished.cancel();
    }

    // ========================================
    // Read Loop / Dispatch
    // ========================================

    async fn run_loop(self: Arc<Self>, mut reader: LegReader, stop: CancellationToken) {
        let leg = Arc::clone(reader.leg());
        let side = leg.remote();

        loop {
            let result = tokio::select! {
                biased;
                () = stop.cancelled() => break,
                result = reader.read_packet() => result,
            };

            match result {
                Ok(Some(packet)) => {
                    if let Err(e) = self.dispatch(packet).await {
                        if self.is_current(&leg) {
                            warn!(session_id = %self.id, side = %side, error = %e, "Closing session");
                            self.close(e.to_string(), false).await;
                        }
                        break;
                    }
                }
                Ok(None) => {
                    if self.is_current(&leg) {
                        debug!(session_id = %self.id, side = %side, "Peer closed the connection");
                        match side {
                            Direction::Client => self.close("client disconnected", true).await,
                            Direction::Server => self.close("backend closed the connection", false).await,
                        }
                    }
                    break;
                }
                Err(e) => {
                    if self.is_current(&leg) {
                        warn!(session_id = %self.id, side = %side, error = %e, "Read failed, closing session");
                        self.close(e.to_string(), false).await;
                    }
                    break;
                }
            }
        }

        trace!(session_id = %self.id, side = %side, "Read loop stopped");
    }

    fn is_current(&self, leg: &Arc<Leg>) -> bool {
        match leg.remote() {
            Direction::Client => true,
            Direction::Server => self
                .server
                .read()
                .as_ref()
                .is_some_and(|s| Arc::ptr_eq(&s.leg, leg)),
        }
    }

    async fn dispatch(self: &Arc<Self>, packet: Packet) -> Result<()> {
        packet.phase.check(packet.id, packet.direction)?;

        self.touch();
        self.stats.record_in(packet.direction, packet.payload.len());
        self.ctx.hub.mirror(&self.id, &packet);

        let key = ListenerKey::new(packet.id, packet.phase, packet.direction);
        let Some(chain) = self.ctx.registry.lookup(&key) else {
            return self.forward(&packet, None).await;
        };

        let ctx = PacketContext::new(Arc::clone(self), packet.clone());
        let mut failed = false;
        for entry in chain {
            match entry.mode {
                DispatchMode::Blocking => {
                    if let Err(e) = entry.handler.handle(ctx.clone()).await {
                        self.handler_failed(&entry.name, &packet, &e).await;
                        failed = true;
                        break;
                    }
                }
                DispatchMode::Detached => self.spawn_detached(entry, ctx.detach()),
            }
        }

        if ctx.is_consumed() || !self.is_open() {
            return Ok(());
        }
        if failed && self.ctx.config.protocol.on_handler_failure == FailurePolicy::Drop {
            return Ok(());
        }
        if chain.iter().any(|e| e.forward == ForwardPolicy::Forward) {
            self.forward(&packet, ctx.rewritten()).await?;
        }
        Ok(())
    }

    fn spawn_detached(self: &Arc<Self>, entry: &ListenerEntry, ctx: PacketContext) {
        let session = Arc::clone(self);
        let handler = Arc::clone(&entry.handler);
        let name = entry.name.clone();
        let stop = self.cancel.clone();

        self.tasks.spawn(async move {
            let packet = ctx.packet().clone();
            tokio::select! {
                biased;
                () = stop.cancelled() => {
                    trace!(session_id = %session.id, handler = %name, "Detached handler cancelled");
                }
                result = handler.handle(ctx) => {
                    if let Err(e) = result {
                        session.handler_failed(&name, &packet, &e).await;
                    }
                }
            }
        });
    }

    async fn handler_failed(self: &Arc<Self>, handler: &str, packet: &Packet, error: &ServerError) {
        self.stats.record_handler_failure();
        warn!(
            session_id = %self.id,
            handler,
            packet_id = packet.id,
            phase = %packet.phase,
            direction = %packet.direction,
            error = %error,
            "Packet handler failed"
        );
        self.emit(
            "handler_error",
            json!({
                "handler": handler,
                "packet_id": packet.id,
                "phase": packet.phase,
                "direction": packet.direction,
                "reason": error.to_string(),
            }),
        )
        .await;
    }

    async fn forward(&self, packet: &Packet, payload: Option<Bytes>) -> Result<()> {
        let payload = payload.unwrap_or_else(|| packet.payload.clone());
        let Some(target) = self.leg(packet.direction.opposite()) else {
            debug!(
                session_id = %self.id,
                packet_id = packet.id,
                phase = %packet.phase,
                "No server leg yet, dropping packet"
            );
            return Ok(());
        };

        target.send(packet.id, &payload).await?;
        self.stats.record_forwarded();
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .field("backend", &self.backend())
            .field("client_phase", &self.client.phase())
            .field("server_phase", &self.phase(Direction::Server))
            .field("idle_time", &self.idle_time())
            .finish_non_exhaustive()
    }
}

// ============================================
// Session Manager
// ============================================

/// Tracks live sessions.
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Session>>,
    max_sessions: usize,
}

impl SessionManager {
    /// Creates a manager allowing `max_sessions` concurrent sessions.
    #[must_use]
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    /// Opens and registers a session; it is removed again once closed.
    ///
    /// # Errors
    /// Returns `SessionLimitReached` if max sessions exceeded.
    pub fn open(
        self: &Arc<Self>,
        ctx: &Arc<ProxyContext>,
        stream: BoxedStream,
        peer: impl Into<String>,
    ) -> Result<Arc<Session>> {
        if self.sessions.len() >= self.max_sessions {
            return Err(ServerError::SessionLimitReached {
                limit: self.max_sessions,
            });
        }

        let session = Session::open(Arc::clone(ctx), stream, peer);
        self.sessions.insert(session.id, Arc::clone(&session));

        info!(
            session_id = %session.id,
            client = %session.peer,
            sessions = self.sessions.len(),
            "Session created"
        );

        let manager = Arc::clone(self);
        let watched = Arc::clone(&session);
        tokio::spawn(async move {
            watched.closed().await;
            manager.remove(&watched.id);
        });

        Ok(session)
    }

    /// Looks up a session.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Unregisters a session.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, s)| s);
        if removed.is_some() {
            debug!(session_id = %id, sessions = self.sessions.len(), "Session removed");
        }
        removed
    }

    /// Number of live sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All live sessions.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Closes every live session and waits for their teardown.
    pub async fn close_all(&self, reason: &str, force: bool) {
        let sessions = self.all_sessions();
        if !sessions.is_empty() {
            info!("Closing {} sessions", sessions.len());
        }
        for session in sessions {
            session.close(reason, force).await;
            self.remove(&session.id);
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.count())
            .field("max_sessions", &self.max_sessions)
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::io::DuplexStream;

    use mcrelay_core::protocol::login::LoginStart;
    use mcrelay_transport::{MockBackend, MockConnector};

    use crate::handlers::{event_fn, EventBusBuilder, ListenerRegistryBuilder};

    struct CloseRecorder(Arc<Mutex<Vec<String>>>);

    impl Plugin for CloseRecorder {
        fn name(&self) -> &'static str {
            "close-recorder"
        }

        fn register(&self, _listeners: &mut ListenerRegistryBuilder, events: &mut EventBusBuilder) {
            let seen = Arc::clone(&self.0);
            events.subscribe(
                "close",
                event_fn(move |event| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.lock().push(event.data.as_str().unwrap_or_default().to_string());
                        Ok(Value::Null)
                    }
                }),
            );
        }
    }

    fn context() -> (Arc<ProxyContext>, tokio::sync::mpsc::UnboundedReceiver<MockBackend>) {
        let (connector, backends) = MockConnector::new();
        let ctx = ProxyContext::builder(ProxyConfig::default())
            .connector(Arc::new(connector))
            .build();
        (Arc::new(ctx), backends)
    }

    fn client_pair(ctx: &Arc<ProxyContext>) -> (Arc<Session>, (Arc<Leg>, LegReader)) {
        let (near, far): (DuplexStream, DuplexStream) = tokio::io::duplex(64 * 1024);
        let session = Session::open(Arc::clone(ctx), Box::new(near), "test-client");
        let client = Leg::open(Box::new(far), Direction::Server, 4096, "proxy");
        (session, client)
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = SessionStats::default();
        stats.record_in(Direction::Client, 10);
        stats.record_in(Direction::Server, 5);
        stats.record_in(Direction::Server, 5);
        stats.record_forwarded();
        stats.record_handler_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.packets_from_client, 1);
        assert_eq!(snapshot.packets_from_server, 2);
        assert_eq!(snapshot.bytes_from_server, 10);
        assert_eq!(snapshot.packets_forwarded, 1);
        assert_eq!(snapshot.handler_failures, 1);
        assert_eq!(snapshot.transfers, 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (connector, _backends) = MockConnector::new();
        let ctx = Arc::new(
            ProxyContext::builder(ProxyConfig::default())
                .connector(Arc::new(connector))
                .plugin(CloseRecorder(Arc::clone(&seen)))
                .build(),
        );
        let (session, (_client, mut client_reader)) = client_pair(&ctx);

        session.close("first", false).await;
        session.close("second", false).await;
        session.closed().await;

        assert!(!session.is_open());
        assert_eq!(*seen.lock(), ["first"]);
        assert!(session.client_leg().is_closed());
        // Handshaking client gets no disconnect notice, only EOF.
        assert!(client_reader.read_packet().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_client_eof_closes_session() {
        let (ctx, _backends) = context();
        let (session, (client, _reader)) = client_pair(&ctx);

        client.shutdown().await;
        tokio::time::timeout(Duration::from_secs(2), session.closed())
            .await
            .unwrap();
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_handshake_and_login_start_connect_backend() {
        let (ctx, mut backends) = context();
        let (session, (client, _reader)) = client_pair(&ctx);

        let handshake = Handshake {
            protocol_version: 47,
            server_address: "localhost".into(),
            server_port: 41223,
            next_phase: Phase::Login,
        };
        client.send(ids::HANDSHAKE, &handshake.encode()).await.unwrap();
        let start = LoginStart {
            username: "Alex".into(),
        };
        client.send(ids::LOGIN_START, &start.encode()).await.unwrap();

        let backend = backends.recv().await.unwrap();
        assert_eq!(backend.addr, BackendAddr::new("mc.hypixel.net", 25565));
        let (backend_leg, mut backend_reader) =
            Leg::open(Box::new(backend.stream), Direction::Client, 4096, "backend");

        let received = backend_reader.read_packet().await.unwrap().unwrap();
        let received = Handshake::decode(received.payload).unwrap();
        assert_eq!(received.server_address, "mc.hypixel.net");
        assert_eq!(received.next_phase, Phase::Login);
        backend_leg.advance(Phase::Login).unwrap();

        let forwarded = backend_reader.read_packet().await.unwrap().unwrap();
        assert_eq!(LoginStart::decode(forwarded.payload).unwrap().username, "Alex");

        assert_eq!(session.client_leg().phase(), Phase::Login);
        assert_eq!(session.phase(Direction::Server), Some(Phase::Login));
        assert_eq!(session.profile().unwrap().username, "Alex");
        session.close("done", true).await;
    }

    #[tokio::test]
    async fn test_manager_limit_and_removal() {
        let (ctx, _backends) = context();
        let manager = Arc::new(SessionManager::new(1));

        let (a, _a_far) = tokio::io::duplex(1024);
        let (b, _b_far) = tokio::io::duplex(1024);
        let first = manager.open(&ctx, Box::new(a), "a").unwrap();
        let second = manager.open(&ctx, Box::new(b), "b");
        assert!(matches!(second, Err(ServerError::SessionLimitReached { limit: 1 })));
        assert_eq!(manager.count(), 1);

        first.close("bye", true).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while !manager.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_transfer_requires_login() {
        let (ctx, _backends) = context();
        let (session, _client) = client_pair(&ctx);
        let err = session
            .transfer_to(BackendAddr::new("other", 25565))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidState { .. }));
        session.close("done", true).await;
    }
}
