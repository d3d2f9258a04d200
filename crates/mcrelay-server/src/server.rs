// ============================================
// File: crates/mcrelay-server/src/server.rs
// ============================================
//! # Server Orchestrator
//!
//! ## Creation Reason
//! Binds the client listener, hands accepted connections to the session
//! manager and coordinates shutdown.
//!
//! ## Main Functionality
//! - `Server`: lifecycle (run, serve, shutdown)
//! - Accept task with session limit enforcement
//! - Two-stage shutdown: drain, then force
//!
//! ## Server Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                           Server                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌──────────────┐   accept   ┌──────────────────────────┐   │
//! │  │ Accept Task  │──────────►│      SessionManager       │   │
//! │  │ TcpListener  │           │  open / remove / close_all│   │
//! │  └──────────────┘           └────────────┬──────────────┘   │
//! │                                          │                  │
//! │                                          ▼                  │
//! │                              ┌──────────────────────────┐   │
//! │                              │  Session (client loop,   │   │
//! │                              │  server loop, peers)     │   │
//! │                              └──────────────────────────┘   │
//! │                                                             │
//! │  ProxyContext: config, registry, events, connector, hub     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Shutdown
//! ```text
//! Ctrl+C #1 ─► stop accepting ─► wait for sessions (≤ shutdown_grace)
//! Ctrl+C #2 or grace expiry ─► close every session
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `shutdown()` stands in for the first Ctrl+C only
//!
//! ## Last Modified
//! v0.1.0 - Initial server implementation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mcrelay_transport::bind_listener;

use crate::config::ProxyConfig;
use crate::error::Result;
use crate::services::{ProxyContext, SessionManager};

/// Interval at which the drain stage re-checks the session count.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================
// Server
// ============================================

/// The proxy server.
///
/// # Lifecycle
/// 1. Create with `Server::new(config)` or `Server::with_context(ctx)`
/// 2. Start with `server.run().await`
/// 3. Shutdown via Ctrl+C or `server.shutdown()`
pub struct Server {
    /// Shared proxy environment.
    ctx: Arc<ProxyContext>,
    /// Live sessions.
    sessions: Arc<SessionManager>,
    /// Shutdown flag.
    shutdown: Arc<AtomicBool>,
    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Creates a server with the built-in plugins and a TCP connector.
    #[must_use]
    pub fn new(config: ProxyConfig) -> Self {
        Self::with_context(ProxyContext::builder(config).build())
    }

    /// Creates a server around a prepared context.
    #[must_use]
    pub fn with_context(ctx: ProxyContext) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let sessions = Arc::new(SessionManager::new(ctx.config.limits.max_sessions));
        Self {
            ctx: Arc::new(ctx),
            sessions,
            shutdown: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// The proxy context.
    #[must_use]
    pub fn context(&self) -> &Arc<ProxyContext> {
        &self.ctx
    }

    /// The session manager.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Binds the configured listen address and serves until shutdown.
    ///
    /// # Errors
    /// Returns error if the listener cannot be bound.
    pub async fn run(&self) -> Result<()> {
        info!("Starting mcrelay v{}", env!("CARGO_PKG_VERSION"));

        let listener = bind_listener(self.ctx.config.listen_addr())?;
        self.serve(listener).await
    }

    /// Serves clients from `listener` until shutdown.
    ///
    /// # Errors
    /// Returns error if the listener address cannot be read.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();
        tasks.push(("accept", self.spawn_accept_task(listener)));

        info!(
            listen = %local_addr,
            backend = %self.ctx.config.backend(),
            max_sessions = self.ctx.config.limits.max_sessions,
            "Proxy started successfully"
        );

        self.wait_for_shutdown(&mut shutdown_rx).await;

        // Stop accepting
        info!("Shutting down, no longer accepting clients");
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        for (name, task) in tasks {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(Ok(())) => debug!("Task '{}' completed", name),
                Ok(Err(e)) => warn!("Task '{}' panicked: {}", name, e),
                Err(_) => warn!("Task '{}' timed out during shutdown", name),
            }
        }

        self.drain().await;

        info!("Proxy stopped");
        Ok(())
    }

    /// Spawns the client accept task.
    fn spawn_accept_task(&self, listener: TcpListener) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let sessions = Arc::clone(&self.sessions);
        let shutdown = Arc::clone(&self.shutdown);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Accept task received shutdown signal");
                        break;
                    }
                    accepted = listener.accept() => {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }

                        match accepted {
                            Ok((stream, peer)) => {
                                if let Err(e) = stream.set_nodelay(true) {
                                    debug!(client = %peer, "Failed to set TCP_NODELAY: {}", e);
                                }
                                if let Err(e) = sessions.open(&ctx, Box::new(stream), peer.to_string()) {
                                    warn!(client = %peer, error = %e, "Rejecting connection");
                                }
                            }
                            Err(e) => {
                                error!("Accept error: {}", e);
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }
                        }
                    }
                }
            }

            debug!("Accept task exiting");
        })
    }

    /// Waits for sessions to finish, then closes whatever is left.
    async fn drain(&self) {
        if self.sessions.is_empty() {
            return;
        }

        let grace = self.ctx.config.shutdown_grace();
        info!(
            sessions = self.sessions.count(),
            grace_secs = grace.as_secs(),
            "Waiting for sessions to close, Ctrl+C again to force"
        );

        let drained = async {
            while !self.sessions.is_empty() {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        };

        tokio::select! {
            () = drained => {
                info!("All sessions closed");
                return;
            }
            () = tokio::time::sleep(grace) => {
                warn!("Shutdown grace period expired");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                warn!("Second Ctrl+C received");
            }
        }

        self.sessions.close_all("Proxy shutting down", false).await;
    }

    /// Waits for shutdown signal (Ctrl+C or programmatic).
    async fn wait_for_shutdown(&self, shutdown_rx: &mut broadcast::Receiver<()>) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }

        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    let _ = shutdown_rx.recv().await;
                }
            },
            _ = shutdown_rx.recv() => info!("Shutdown requested"),
        }
    }

    /// Triggers server shutdown programmatically.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listen_addr", &self.ctx.config.listen_addr())
            .field("backend", &self.ctx.config.backend())
            .field("sessions", &self.sessions.count())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
