//! WebSocket transport layer.
//!
//! This module handles the raw socket to a relay: handshake, framing and
//! the I/O event loop. Everything above it works with structured
//! [`protocol`](crate::protocol) values.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Relay (Rust)   │                              │  Remote relay   │
//! │                 │         WebSocket            │                 │
//! │  Connection     │─────────────────────────────►│  ws:// / wss:// │
//! │  + event loop   │◄─────────────────────────────│                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::open` - Handshake with timeout, spawn event loop
//! 2. `Connection::send` - Queue client frames
//! 3. Handler receives parsed relay frames
//! 4. `Connection::shutdown` - Close on request, or `Closed` on remote end
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionEvent, MessageHandler};
