//! Error types for the relay pool.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use nostr_relay_pool::{Relay, Result};
//!
//! fn example() -> Result<()> {
//!     let relay = Relay::new("wss://relay.example.com")?;
//!     relay.connect()?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`], [`Error::NoRuntime`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`], [`Error::NotConnected`] |
//! | Protocol | [`Error::Protocol`], [`Error::SubscriptionNotFound`], [`Error::SubscriptionClosed`], [`Error::TooManyPendingAcks`] |
//! | Signing | [`Error::Signing`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::SubscriptionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when pool or relay options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Relay URL is malformed or not a WebSocket URL.
    #[error("Invalid relay URL {url}: {message}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    /// Called outside a Tokio runtime.
    ///
    /// Connection work is spawned onto the current runtime, so operations
    /// that open sockets must run inside one.
    #[error("No Tokio runtime available for {operation}")]
    NoRuntime {
        /// The operation that needed a runtime.
        operation: &'static str,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection timeout while opening the socket.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation requires an open connection.
    ///
    /// Returned by [`Relay::send`](crate::Relay::send) when the relay is not
    /// connected. The relay never auto-connects on this path.
    #[error("Relay not connected: {url}")]
    NotConnected {
        /// URL of the relay.
        url: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unparseable relay frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Subscription id is not registered on the relay.
    #[error("Subscription not found: {subscription_id}")]
    SubscriptionNotFound {
        /// The unknown subscription.
        subscription_id: SubscriptionId,
    },

    /// Relay closed a subscription with a `CLOSED` frame.
    #[error("Subscription {subscription_id} closed by relay: {message}")]
    SubscriptionClosed {
        /// The closed subscription.
        subscription_id: SubscriptionId,
        /// Reason given by the relay.
        message: String,
    },

    /// Too many sends waiting for an `OK` acknowledgment.
    #[error("Too many pending acknowledgments: {pending}/{max}")]
    TooManyPendingAcks {
        /// Current pending count.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    // ========================================================================
    // Signing Errors
    // ========================================================================
    /// Signing collaborator failed.
    #[error("Signing failed: {message}")]
    Signing {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a missing runtime error.
    #[inline]
    pub fn no_runtime(operation: &'static str) -> Self {
        Self::NoRuntime { operation }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a not connected error.
    #[inline]
    pub fn not_connected(url: impl Into<String>) -> Self {
        Self::NotConnected { url: url.into() }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a subscription not found error.
    #[inline]
    pub fn subscription_not_found(subscription_id: SubscriptionId) -> Self {
        Self::SubscriptionNotFound { subscription_id }
    }

    /// Creates a subscription closed error.
    #[inline]
    pub fn subscription_closed(subscription_id: SubscriptionId, message: impl Into<String>) -> Self {
        Self::SubscriptionClosed {
            subscription_id,
            message: message.into(),
        }
    }

    /// Creates a signing error.
    #[inline]
    pub fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry, e.g. through
    /// [`RelayPool::connect_and_send_filters_if_disconnected`](crate::RelayPool::connect_and_send_filters_if_disconnected).
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::NotConnected { .. }
                | Self::TooManyPendingAcks { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
