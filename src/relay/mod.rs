//! Single-relay connection management.
//!
//! A [`Relay`] wraps one socket to one relay URL together with the state
//! that must survive reconnects (subscription filters) and the state that
//! must not (EOSE markers, pending acknowledgments).
//!
//! # Notifications
//!
//! | Notification | Trigger |
//! |--------------|---------|
//! | `Event` | `EVENT` frame for an active subscription |
//! | `Error` | Connect failure, lost socket, or `CLOSED` frame |
//! | `StateChanged` | Connect, disconnect, or `EOSE` |
//! | `SendResponse` | `OK` frame |
//! | `Auth` | `AUTH` challenge |
//! | `Notice` | `NOTICE` frame |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | The [`Relay`] handle |
//! | `state` | Connection state and transition types |
//! | `notification` | Listener trait and notification enum |
//! | `callbacks` | Per-send completion callbacks |

// ============================================================================
// Submodules
// ============================================================================

/// Per-send completion callbacks.
pub mod callbacks;

/// The relay handle.
mod core;

/// Listener trait and notifications.
pub mod notification;

/// Connection state.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use callbacks::{DoneCallback, DoneOnce, LoadingCallback, SendCallbacks};
pub use core::Relay;
pub use notification::{RelayListener, RelayNotification};
pub use state::{ConnectionState, StateType};

pub(crate) use core::parse_relay_url;
