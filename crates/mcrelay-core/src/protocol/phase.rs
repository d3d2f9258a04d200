// ============================================
// File: crates/mcrelay-core/src/protocol/phase.rs
// ============================================
//! # Connection State Machine
//!
//! ## Creation Reason
//! The meaning of a packet id depends on which protocol phase its leg is
//! in. Each leg tracks its own phase and only ever moves forward.
//!
//! ## Phase Transitions
//! ```text
//!                    ┌──────────┐
//!               ┌──► │  Status  │   (terminal)
//! ┌───────────┐ │    └──────────┘
//! │Handshaking├─┤
//! └───────────┘ │    ┌──────────┐      ┌──────────┐
//!               └──► │  Login   ├────► │   Play   │   (terminal)
//!                    └──────────┘      └──────────┘
//! ```
//! `reset()` back to `Handshaking` is only legal at teardown.
//!
//! ## Accepted Packet Ids
//! | Phase       | from client | from server |
//! |-------------|-------------|-------------|
//! | Handshaking | 0x00        | none        |
//! | Status      | 0x00-0x01   | 0x00-0x01   |
//! | Login       | 0x00-0x01   | 0x00-0x03   |
//! | Play        | any         | any         |
//!
//! Play ids are not checked: the engine treats Play payloads as opaque.
//!
//! ## Last Modified
//! v0.1.0 - Initial phase machine

use std::fmt;

use serde::{Deserialize, Serialize};

use mcrelay_common::Direction;

use crate::error::{CoreError, Result};

// ============================================
// Phase
// ============================================

/// Protocol sub-state that scopes packet-id interpretation on a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Initial phase, a single handshake packet is expected.
    Handshaking,
    /// Server list ping.
    Status,
    /// Authentication, encryption and compression negotiation.
    Login,
    /// Gameplay.
    Play,
}

impl Phase {
    /// Maps the handshake's `next_state` field to a phase.
    #[must_use]
    pub const fn from_next_state(next_state: i32) -> Option<Self> {
        match next_state {
            1 => Some(Self::Status),
            2 => Some(Self::Login),
            _ => None,
        }
    }

    /// Returns `true` if `to` is a valid successor of `self`.
    #[must_use]
    pub const fn can_advance_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Handshaking, Self::Status | Self::Login) | (Self::Login, Self::Play)
        )
    }

    /// Returns `true` if a packet with `id` sent by `direction` is valid
    /// in this phase.
    #[must_use]
    pub const fn accepts(self, id: u32, direction: Direction) -> bool {
        match (self, direction) {
            (Self::Handshaking, Direction::Client) => id == 0x00,
            (Self::Handshaking, Direction::Server) => false,
            (Self::Status, _) => id <= 0x01,
            (Self::Login, Direction::Client) => id <= 0x01,
            (Self::Login, Direction::Server) => id <= 0x03,
            (Self::Play, _) => true,
        }
    }

    /// Checks a packet against [`Phase::accepts`].
    ///
    /// # Errors
    /// `CoreError::UnexpectedPacket` if the id is not valid here.
    pub fn check(self, id: u32, direction: Direction) -> Result<()> {
        if self.accepts(id, direction) {
            Ok(())
        } else {
            Err(CoreError::UnexpectedPacket {
                id,
                phase: self,
                direction,
            })
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Status => write!(f, "Status"),
            Self::Login => write!(f, "Login"),
            Self::Play => write!(f, "Play"),
        }
    }
}

// ============================================
// ConnectionState
// ============================================

/// Per-leg phase tracker.
///
/// # Example
/// ```
/// use mcrelay_core::protocol::phase::{ConnectionState, Phase};
///
/// let mut state = ConnectionState::new();
/// state.advance(Phase::Login).unwrap();
/// state.advance(Phase::Play).unwrap();
/// assert!(state.advance(Phase::Login).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    phase: Phase,
}

impl ConnectionState {
    /// Creates a tracker in `Handshaking`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: Phase::Handshaking,
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn current(&self) -> Phase {
        self.phase
    }

    /// Moves to `to`.
    ///
    /// Advancing to the phase the leg is already in is a no-op, so the
    /// client and server legs can both be nudged by the same handler.
    ///
    /// # Errors
    /// `CoreError::InvalidTransition` if `to` is not a valid successor.
    pub fn advance(&mut self, to: Phase) -> Result<()> {
        if self.phase == to {
            return Ok(());
        }
        if !self.phase.can_advance_to(to) {
            return Err(CoreError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Returns to `Handshaking`. Teardown only.
    pub fn reset(&mut self) {
        self.phase = Phase::Handshaking;
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        let mut status = ConnectionState::new();
        status.advance(Phase::Status).unwrap();
        assert_eq!(status.current(), Phase::Status);

        let mut play = ConnectionState::new();
        play.advance(Phase::Login).unwrap();
        play.advance(Phase::Play).unwrap();
        assert_eq!(play.current(), Phase::Play);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut state = ConnectionState::new();
        assert!(matches!(
            state.advance(Phase::Play),
            Err(CoreError::InvalidTransition {
                from: Phase::Handshaking,
                to: Phase::Play
            })
        ));

        state.advance(Phase::Status).unwrap();
        assert!(state.advance(Phase::Login).is_err());
        assert_eq!(state.current(), Phase::Status);
    }

    #[test]
    fn test_advance_to_same_phase_is_noop() {
        let mut state = ConnectionState::new();
        state.advance(Phase::Login).unwrap();
        state.advance(Phase::Login).unwrap();
        assert_eq!(state.current(), Phase::Login);
    }

    #[test]
    fn test_reset() {
        let mut state = ConnectionState::new();
        state.advance(Phase::Login).unwrap();
        state.reset();
        assert_eq!(state.current(), Phase::Handshaking);
    }

    #[test]
    fn test_accepts() {
        assert!(Phase::Handshaking.accepts(0x00, Direction::Client));
        assert!(!Phase::Handshaking.accepts(0x01, Direction::Client));
        assert!(!Phase::Handshaking.accepts(0x00, Direction::Server));

        assert!(Phase::Login.accepts(0x03, Direction::Server));
        assert!(!Phase::Login.accepts(0x04, Direction::Server));
        assert!(!Phase::Login.accepts(0x02, Direction::Client));

        assert!(Phase::Play.accepts(0x7F, Direction::Client));
        assert!(Phase::Status.check(0x02, Direction::Client).is_err());
    }

    #[test]
    fn test_next_state_mapping() {
        assert_eq!(Phase::from_next_state(1), Some(Phase::Status));
        assert_eq!(Phase::from_next_state(2), Some(Phase::Login));
        assert_eq!(Phase::from_next_state(3), None);
    }
}
