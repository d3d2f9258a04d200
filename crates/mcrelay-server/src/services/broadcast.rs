// ============================================
// File: crates/mcrelay-server/src/services/broadcast.rs
// ============================================
//! # Broadcast Hub
//!
//! ## Creation Reason
//! A session can fan its traffic out to extra backend connections
//! ("peers") that log in independently and then receive a copy of every
//! Play packet of the primary. Peers are best-effort: the primary never
//! waits for them and never fails because of them.
//!
//! ## Main Functionality
//! - `BroadcastHub`: peers per primary session
//! - `BroadcastPeer`: one extra backend leg with a bounded queue
//! - `MirrorDirection`: which side's packets are copied
//!
//! ## Peer Tasks
//! ```text
//!  primary loop ──try_send──► [bounded queue] ──► writer task ──► peer leg ──► backend
//!                                                                         │
//!                             reader task ◄── keep-alive echo / drain ◄──┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `mirror` is synchronous and never awaits; a full queue retires the
//!   peer instead of applying backpressure to the primary
//! - Retirement is idempotent and always ends with `peer_retired`
//! - Peer legs only speak serverbound; mirroring backend packets
//!   (`MirrorDirection::Server`/`Both`) replays them upstream verbatim
//!
//! ## Last Modified
//! v0.1.0 - Initial broadcast hub

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use mcrelay_common::{Direction, SessionId};
use mcrelay_core::protocol::login::{decode_set_compression, ids};
use mcrelay_core::protocol::{Packet, Phase};
use mcrelay_transport::{Leg, LegReader};

use crate::config::BroadcastConfig;
use crate::error::{Result, ServerError};
use crate::handlers::EventBus;
use crate::services::handshake::backend_login;
use crate::services::session::Session;

// ============================================
// MirrorDirection / PeerOptions
// ============================================

/// Which packets of the primary are copied to peers.
///
/// Peers are backend connections, so every mirrored packet is written
/// to the peer's backend as if a client had sent it. `Server` and `Both`
/// therefore replay clientbound packets into a serverbound stream; only
/// use them with backends (or plugins on the peer leg) that expect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorDirection {
    /// Packets sent by the client.
    #[default]
    Client,
    /// Packets sent by the server.
    Server,
    /// Both.
    Both,
}

impl MirrorDirection {
    /// Returns `true` if packets sent by `direction` are mirrored.
    #[must_use]
    pub const fn includes(self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Self::Both, _) | (Self::Client, Direction::Client) | (Self::Server, Direction::Server)
        )
    }

    /// Returns `true` if backend packets are written into peer legs.
    #[must_use]
    pub const fn replays_server_packets(self) -> bool {
        self.includes(Direction::Server)
    }
}

/// Per-peer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerOptions {
    /// Mirrored side.
    pub mirror: MirrorDirection,
    /// Queue capacity before the peer is retired.
    pub queue_capacity: usize,
    /// Play keep-alive id echoed back to the backend.
    pub keep_alive_id: u32,
}

impl PeerOptions {
    /// Options from the `[broadcast]` config section.
    #[must_use]
    pub fn from_config(config: &BroadcastConfig) -> Self {
        Self {
            mirror: config.mirror,
            queue_capacity: config.peer_queue_capacity.max(1),
            keep_alive_id: config.keep_alive_id,
        }
    }
}

// ============================================
// BroadcastPeer
// ============================================

/// One broadcast peer.
pub struct BroadcastPeer {
    id: u64,
    primary: SessionId,
    leg: Arc<Leg>,
    options: PeerOptions,
    queue: mpsc::Sender<Packet>,
    cancel: CancellationToken,
    retired: AtomicBool,
    delivered: AtomicU64,
}

impl BroadcastPeer {
    /// Hub-unique peer id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Id of the primary session.
    #[must_use]
    pub const fn primary(&self) -> &SessionId {
        &self.primary
    }

    /// The peer's backend leg.
    #[must_use]
    pub fn leg(&self) -> &Arc<Leg> {
        &self.leg
    }

    /// Mirrored side.
    #[must_use]
    pub const fn mirror(&self) -> MirrorDirection {
        self.options.mirror
    }

    /// Packets written to the peer's backend so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Returns `true` once the peer has been retired.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Resolves once the peer has been retired.
    pub async fn retired(&self) {
        self.cancel.cancelled().await;
    }
}

impl fmt::Debug for BroadcastPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastPeer")
            .field("id", &self.id)
            .field("primary", &self.primary)
            .field("backend", &self.leg.peer())
            .field("mirror", &self.options.mirror)
            .field("delivered", &self.delivered())
            .field("retired", &self.is_retired())
            .finish()
    }
}

// ============================================
// BroadcastHub
// ============================================

/// Registry of peers keyed by primary session.
#[derive(Default)]
pub struct BroadcastHub {
    peers: DashMap<SessionId, Vec<Arc<BroadcastPeer>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs a new peer into the primary's current backend and starts
    /// mirroring to it.
    ///
    /// # Errors
    /// - `SessionClosed` if the primary is closed
    /// - `InvalidState` before the primary finished its own login
    /// - Backend login errors (`HandshakeTimeout`, `BackendRejected`, ...)
    pub async fn spawn_peer(
        &self,
        primary: &Arc<Session>,
        options: PeerOptions,
    ) -> Result<Arc<BroadcastPeer>> {
        if !primary.is_open() {
            return Err(ServerError::SessionClosed(primary.id));
        }
        let profile = primary
            .profile()
            .ok_or_else(|| ServerError::invalid_state("primary has not logged in"))?;

        let backend = primary.backend();
        let reported = primary.reported_addr(&backend);
        let login = backend_login(primary.context(), &backend, &reported, &profile).await?;

        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
        let peer = Arc::new(BroadcastPeer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            primary: primary.id,
            leg: Arc::clone(&login.leg),
            options,
            queue: tx,
            cancel: CancellationToken::new(),
            retired: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
        });

        self.peers
            .entry(primary.id)
            .or_default()
            .push(Arc::clone(&peer));

        // Checked after linking so a concurrent close cannot miss the peer.
        if !primary.is_open() {
            self.retire_peer(&peer).await;
            return Err(ServerError::SessionClosed(primary.id));
        }

        if peer.options.mirror.replays_server_packets() {
            warn!(
                session_id = %primary.id,
                peer_id = peer.id,
                mirror = ?peer.options.mirror,
                "Peer mirrors backend packets, they are sent upstream as client packets"
            );
        }

        let events = Arc::clone(&primary.context().events);
        tokio::spawn(run_writer(
            Arc::clone(&peer),
            rx,
            Arc::downgrade(primary),
            events,
        ));
        tokio::spawn(run_reader(Arc::clone(&peer), login.reader));

        info!(
            session_id = %primary.id,
            peer_id = peer.id,
            backend = %backend,
            mirror = ?peer.options.mirror,
            "Broadcast peer spawned"
        );
        primary
            .emit(
                "peer_spawned",
                json!({ "peer_id": peer.id, "backend": backend.to_string() }),
            )
            .await;

        Ok(peer)
    }

    /// Copies `packet` to every peer of `session` that mirrors its side.
    ///
    /// Only Play packets are mirrored. Never waits.
    pub fn mirror(&self, session: &SessionId, packet: &Packet) {
        if packet.phase != Phase::Play {
            return;
        }

        let mut overflowed = Vec::new();
        if let Some(peers) = self.peers.get(session) {
            for peer in peers.iter() {
                if peer.is_retired() || !peer.options.mirror.includes(packet.direction) {
                    continue;
                }
                if peer.queue.try_send(packet.clone()).is_err() {
                    overflowed.push(Arc::clone(peer));
                }
            }
        }

        for peer in overflowed {
            warn!(
                session_id = %session,
                peer_id = peer.id,
                "Broadcast peer queue full or closed, retiring"
            );
            self.detach(&peer);
        }
    }

    /// Retires `peer`: stops its tasks, closes its leg, removes it.
    /// Idempotent.
    pub async fn retire_peer(&self, peer: &Arc<BroadcastPeer>) {
        if self.detach(peer) {
            peer.leg.shutdown().await;
        }
    }

    /// Retires every peer of `session`.
    pub async fn retire_all(&self, session: &SessionId) {
        let Some((_, peers)) = self.peers.remove(session) else {
            return;
        };
        for peer in &peers {
            self.retire_peer(peer).await;
        }
    }

    /// Live peers of `session`.
    #[must_use]
    pub fn peers(&self, session: &SessionId) -> Vec<Arc<BroadcastPeer>> {
        self.peers
            .get(session)
            .map(|peers| peers.iter().filter(|p| !p.is_retired()).cloned().collect())
            .unwrap_or_default()
    }

    /// Number of live peers across all sessions.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.iter().map(|entry| entry.value().len()).sum()
    }

    /// Marks retired, cancels tasks and unlinks. Returns `false` if the
    /// peer was already retired.
    fn detach(&self, peer: &Arc<BroadcastPeer>) -> bool {
        if peer.retired.swap(true, Ordering::AcqRel) {
            return false;
        }
        peer.cancel.cancel();

        if let Some(mut peers) = self.peers.get_mut(&peer.primary) {
            peers.retain(|p| p.id != peer.id);
        }
        self.peers.remove_if(&peer.primary, |_, peers| peers.is_empty());

        debug!(session_id = %peer.primary, peer_id = peer.id, "Broadcast peer detached");
        true
    }
}

impl fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("sessions", &self.peers.len())
            .field("peers", &self.peer_count())
            .finish()
    }
}

// ============================================
// Peer Tasks
// ============================================

async fn run_writer(
    peer: Arc<BroadcastPeer>,
    mut rx: mpsc::Receiver<Packet>,
    primary: Weak<Session>,
    events: Arc<EventBus>,
) {
    loop {
        tokio::select! {
            biased;
            () = peer.cancel.cancelled() => break,
            next = rx.recv() => {
                let Some(packet) = next else { break };
                if let Err(e) = peer.leg.forward(&packet).await {
                    debug!(peer_id = peer.id, error = %e, "Broadcast peer write failed");
                    break;
                }
                peer.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // Write failure retires through the primary's hub when it still exists.
    if let Some(session) = primary.upgrade() {
        session.context().hub.detach(&peer);
    } else {
        peer.retired.store(true, Ordering::Release);
        peer.cancel.cancel();
    }
    peer.leg.shutdown().await;

    info!(
        session_id = %peer.primary,
        peer_id = peer.id,
        delivered = peer.delivered(),
        "Broadcast peer retired"
    );
    events
        .emit(
            "peer_retired",
            json!({ "peer_id": peer.id, "delivered": peer.delivered() }),
            primary.upgrade(),
        )
        .await;
}

async fn run_reader(peer: Arc<BroadcastPeer>, mut reader: LegReader) {
    loop {
        let packet = tokio::select! {
            biased;
            () = peer.cancel.cancelled() => break,
            result = reader.read_packet() => result,
        };

        match packet {
            Ok(Some(packet)) => {
                if packet.phase != Phase::Play {
                    continue;
                }
                if packet.id == peer.options.keep_alive_id {
                    trace!(peer_id = peer.id, "Echoing keep-alive");
                    if peer.leg.send(packet.id, &packet.payload).await.is_err() {
                        break;
                    }
                } else if packet.id == ids::PLAY_SET_COMPRESSION {
                    match decode_set_compression(packet.payload) {
                        Ok(threshold) => peer.leg.set_compression(threshold),
                        Err(e) => {
                            debug!(peer_id = peer.id, error = %e, "Bad compression packet");
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                debug!(peer_id = peer.id, "Broadcast peer backend closed");
                break;
            }
            Err(e) => {
                debug!(peer_id = peer.id, error = %e, "Broadcast peer read failed");
                break;
            }
        }
    }
    // Wake the writer so it performs retirement.
    peer.cancel.cancel();
}

// ============================================
// Tests
// ============================================
