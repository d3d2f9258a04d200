// ============================================
// File: crates/mcrelay-transport/src/mock.rs
// ============================================
//! # Mock Connector Implementation
//!
//! ## Creation Reason
//! Provides an in-memory `Connector` for testing sessions, transfers
//! and broadcast peers without opening sockets.
//!
//! ## Main Functionality
//! - Every `connect` creates a `tokio::io::duplex` pipe
//! - The far end is handed to the test as a `MockBackend`
//! - Selected hosts can be refused to simulate dead backends
//!
//! ## Usage in Tests
//! ```ignore
//! let (connector, mut backends) = MockConnector::new();
//! let stream = connector.connect(&"hub.example:25565".parse()?).await?;
//! let backend = backends.recv().await.unwrap();
//! assert_eq!(backend.addr.host, "hub.example");
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - A backend that is never read from simply never answers, which is
//!   how handshake timeouts are simulated
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use mcrelay_common::BackendAddr;

use crate::error::{Result, TransportError};
use crate::traits::{BoxedStream, Connector};

// ============================================
// Constants
// ============================================

/// Buffer size of each in-memory pipe.
const PIPE_CAPACITY: usize = 256 * 1024;

// ============================================
// MockBackend
// ============================================

/// Far end of a mocked backend connection.
#[derive(Debug)]
pub struct MockBackend {
    /// Address the proxy dialed.
    pub addr: BackendAddr,
    /// Backend side of the pipe.
    pub stream: DuplexStream,
}

// ============================================
// MockConnector
// ============================================

/// In-memory connector for tests.
#[derive(Debug)]
pub struct MockConnector {
    backends: mpsc::UnboundedSender<MockBackend>,
    refused: Mutex<HashSet<String>>,
    connects: AtomicUsize,
}

impl MockConnector {
    /// Creates a connector and the receiver that yields every backend
    /// it connects to.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockBackend>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            backends: tx,
            refused: Mutex::new(HashSet::new()),
            connects: AtomicUsize::new(0),
        };
        (connector, rx)
    }

    /// Makes every future connect to `host` fail.
    pub fn refuse(&self, host: impl Into<String>) {
        self.refused.lock().insert(host.into());
    }

    /// Number of successful connects so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, addr: &BackendAddr) -> Result<BoxedStream> {
        if self.refused.lock().contains(&addr.host) {
            return Err(TransportError::connect_failed(addr, "connection refused (mock)"));
        }

        let (near, far) = tokio::io::duplex(PIPE_CAPACITY);
        self.backends
            .send(MockBackend {
                addr: addr.clone(),
                stream: far,
            })
            .map_err(|_| TransportError::connect_failed(addr, "mock backend receiver dropped"))?;

        self.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(near))
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_mock_connect_pipes_bytes() {
        let (connector, mut backends) = MockConnector::new();
        let addr = BackendAddr::new("hub.example", 25565);

        let mut stream = connector.connect(&addr).await.unwrap();
        let mut backend = backends.recv().await.unwrap();
        assert_eq!(backend.addr, addr);

        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        backend.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_refused_host() {
        let (connector, _backends) = MockConnector::new();
        connector.refuse("dead.example");

        let result = connector.connect(&BackendAddr::new("dead.example", 25565)).await;
        assert!(matches!(result, Err(TransportError::ConnectFailed { .. })));
        assert_eq!(connector.connect_count(), 0);
    }
}
