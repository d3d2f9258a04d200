// ============================================
// File: crates/mcrelay-common/src/time.rs
// ============================================
//! # Time Utilities
//!
//! ## Creation Reason
//! Sessions are touched from two independent leg loops and read from
//! the server's status logging. A lock-free activity stamp keeps that
//! off the packet path's locks.
//!
//! ## Main Functionality
//! - `AtomicInstant`: Thread-safe wrapper around `Instant`
//!
//! ## ⚠️ Important Note for Next Developer
//! - `AtomicInstant` stores nanoseconds since a process-wide reference
//!   instant in an `AtomicU64` (overflows after ~584 years of uptime)
//!
//! ## Last Modified
//! v0.1.0 - Initial time utilities

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

// ============================================
// AtomicInstant
// ============================================

/// Thread-safe wrapper around [`Instant`] for concurrent access.
///
/// # Example
/// ```
/// use mcrelay_common::time::AtomicInstant;
/// use std::time::Instant;
///
/// let last_packet = AtomicInstant::now();
/// last_packet.store(Instant::now());
/// assert!(last_packet.elapsed().as_secs() < 1);
/// ```
#[derive(Debug)]
pub struct AtomicInstant {
    /// Nanoseconds since the reference instant
    nanos: AtomicU64,
}

impl AtomicInstant {
    fn reference() -> Instant {
        static REFERENCE: OnceLock<Instant> = OnceLock::new();
        *REFERENCE.get_or_init(Instant::now)
    }

    fn nanos_since_reference(instant: Instant) -> u64 {
        instant
            .checked_duration_since(Self::reference())
            .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    /// Creates a new `AtomicInstant` set to the current time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_instant(Instant::now())
    }

    /// Creates a new `AtomicInstant` from an `Instant`.
    #[must_use]
    pub fn from_instant(instant: Instant) -> Self {
        Self {
            nanos: AtomicU64::new(Self::nanos_since_reference(instant)),
        }
    }

    /// Loads the stored instant.
    #[must_use]
    pub fn load(&self) -> Instant {
        Self::reference() + Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    /// Stores a new instant.
    pub fn store(&self, instant: Instant) {
        self.nanos
            .store(Self::nanos_since_reference(instant), Ordering::Relaxed);
    }

    /// Updates to the current time.
    pub fn touch(&self) {
        self.store(Instant::now());
    }

    /// Returns the elapsed time since the stored instant.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.load().elapsed()
    }
}

impl Default for AtomicInstant {
    fn default() -> Self {
        Self::now()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_instant_store_and_load() {
        let atomic = AtomicInstant::now();
        let later = Instant::now() + Duration::from_secs(5);
        atomic.store(later);

        let loaded = atomic.load();
        let diff = if loaded > later { loaded - later } else { later - loaded };
        assert!(diff < Duration::from_millis(1));
    }

    #[test]
    fn test_atomic_instant_touch_resets_elapsed() {
        let atomic = AtomicInstant::from_instant(Instant::now());
        std::thread::sleep(Duration::from_millis(20));
        assert!(atomic.elapsed() >= Duration::from_millis(20));

        atomic.touch();
        assert!(atomic.elapsed() < Duration::from_millis(20));
    }
}
