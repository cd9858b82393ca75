//! Relay connection state.
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──open──► Connected
//!      ▲                          │                    │
//!      └──────── error / disconnect() ◄────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

// ============================================================================
// ConnectionState
// ============================================================================

/// Socket lifecycle of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// No socket.
    Disconnected = 0,
    /// Handshake in progress.
    Connecting = 1,
    /// Socket open and usable.
    Connected = 2,
}

impl ConnectionState {
    #[inline]
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

// ============================================================================
// StateType
// ============================================================================

/// Externally visible state transition reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateType {
    /// Socket opened.
    Connect,
    /// Socket closed, by request or by failure.
    Disconnect,
    /// End of stored events for one subscription. Not a connectivity change.
    Eose,
}

impl StateType {
    /// Returns `true` if this transition can change pool connectivity.
    #[inline]
    #[must_use]
    pub const fn affects_connectivity(self) -> bool {
        !matches!(self, Self::Eose)
    }
}

// ============================================================================
// AtomicState
// ============================================================================

/// Lock-free holder for [`ConnectionState`].
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    pub(crate) const fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    /// Stores `state` and returns the previous one.
    #[inline]
    pub(crate) fn swap(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state as u8, Ordering::SeqCst))
    }

    /// Moves from `from` to `to`; returns `false` if the current state was not `from`.
    #[inline]
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
