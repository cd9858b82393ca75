//! Nostr protocol message types.
//!
//! This module defines the structured values exchanged with relays. The pool
//! works at this level; raw frames never leave [`transport`](crate::transport).
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `ClientMessage` | Local → Relay | Publish, subscribe, close, authenticate |
//! | `RelayMessage` | Relay → Local | Events, acks, EOSE, notices, challenges |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | Signed and unsigned events |
//! | `filter` | Subscription filters |
//! | `message` | Frame encoding and decoding |

// ============================================================================
// Submodules
// ============================================================================

/// Signed and unsigned events.
pub mod event;

/// Subscription filters.
pub mod filter;

/// Client and relay frames.
pub mod message;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{Event, UnsignedEvent, is_ephemeral_kind};
pub use filter::Filter;
pub use message::{ClientMessage, RelayMessage};
