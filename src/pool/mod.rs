//! Relay pool: many relays behind one handle.
//!
//! The pool is the sole listener of every relay it owns. It turns relay
//! notifications into [`PoolEvent`]s for its own listeners and keeps the
//! aggregate [`RelayPoolStatus`] current.
//!
//! # Status Recomputation
//!
//! | Trigger | Recomputes |
//! |---------|------------|
//! | `add_relay`, `remove_relay`, `load_relays`, `unload_relays` | Yes |
//! | Relay `Error` | Yes |
//! | `Connect` / `Disconnect` | Yes |
//! | `EOSE` | No |
//!
//! A recomputed status is published only when it differs from the last one.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | The [`RelayPool`] handle |
//! | `listener` | Pool events and listener registry |
//! | `status` | Connectivity summary and publisher |
//! | `dedupe` | Inbound event deduplication |
//! | `watchdog` | Publish watchdogs |

// ============================================================================
// Submodules
// ============================================================================

/// The pool handle.
mod core;

/// Inbound event deduplication.
pub mod dedupe;

/// Pool events and listener registry.
pub mod listener;

/// Connectivity summary.
pub mod status;

/// Publish watchdogs.
mod watchdog;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::{RelayPool, SendReport};
pub use dedupe::EventDeduplicator;
pub use listener::{PoolEvent, PoolListener};
pub use status::RelayPoolStatus;
