//! Nostr relay pool - WebSocket relay connections for a signing application.
//!
//! This library keeps concurrent connections to a changing set of Nostr
//! relays, multiplexes subscription and publish traffic across them, and
//! publishes aggregate connectivity for a UI to observe.
//!
//! # Architecture
//!
//! The pool follows a handle-over-shared-state model:
//!
//! - **Relay**: One socket to one URL, its subscription filters and pending acks
//! - **RelayPool**: Owns relays, fans commands out, re-broadcasts notifications
//! - **Status**: `{connected, available}` published on a `watch` channel
//!
//! Key design principles:
//!
//! - Each [`Relay`] owns: socket + event loop + subscription filters
//! - Relays report to exactly one listener; the pool is that listener
//! - External listeners are weak registrations
//! - Connections opened only to publish are bounded by a watchdog
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use nostr_relay_pool::{Filter, PoolEvent, RelayPool, Result, SubscriptionId};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let pool = RelayPool::new();
//!     pool.load_urls(["wss://relay.damus.io", "wss://nos.lol"])?;
//!
//!     let listener = Arc::new(|event: &PoolEvent| {
//!         if let PoolEvent::Received { event, .. } = event {
//!             println!("{}", event.content);
//!         }
//!     });
//!     pool.register(&listener);
//!
//!     pool.subscribe(&SubscriptionId::generate(), &[Filter::new().kinds([1]).limit(10)]);
//!     pool.request_and_watch()?;
//!
//!     let mut status = pool.subscribe_status();
//!     let _ = status.wait_for(|s| s.is_connected()).await;
//!     println!("connected to {} relays", pool.status().connected);
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`relay`] | Single relay: [`Relay`], notifications, callbacks |
//! | [`pool`] | [`RelayPool`], [`PoolEvent`], [`RelayPoolStatus`] |
//! | [`batch`] | Batch sign-request confirmation |
//! | [`config`] | [`RelayOptions`] and [`PoolConfig`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | NIP-01 message types |
//! | [`transport`] | WebSocket transport layer (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Batch sign-request confirmation.
pub mod batch;

/// Relay and pool configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Relay pool.
///
/// Use [`RelayPool::new()`] to create a pool and add relays to it.
pub mod pool;

/// NIP-01 protocol message types.
pub mod protocol;

/// Single relay connection.
pub mod relay;

/// WebSocket transport layer.
///
/// Internal module handling the socket and its event loop.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Pool types
pub use pool::{EventDeduplicator, PoolEvent, PoolListener, RelayPool, RelayPoolStatus, SendReport};

// Relay types
pub use relay::{
    ConnectionState, DoneCallback, DoneOnce, LoadingCallback, Relay, RelayListener,
    RelayNotification, SendCallbacks, StateType,
};

// Protocol types
pub use protocol::{ClientMessage, Event, Filter, RelayMessage, UnsignedEvent};

// Configuration
pub use config::{PoolConfig, RelayOptions};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ListenerId, RelayId, SubscriptionId};
