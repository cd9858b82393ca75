//! Pool and relay configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use nostr_relay_pool::{PoolConfig, RelayOptions};
//!
//! let config = PoolConfig::new()
//!     .with_publish_timeout(Duration::from_secs(30))
//!     .with_relay_options(RelayOptions::new().with_connect_timeout(Duration::from_secs(5)));
//! config.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for opening a relay socket.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default limit on sends awaiting an `OK` per relay.
pub const DEFAULT_MAX_PENDING_ACKS: usize = 100;

/// Default lifetime of a connection opened only to publish.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of event ids remembered for deduplication.
pub const DEFAULT_DEDUPE_CAPACITY: usize = 10_000;

// ============================================================================
// RelayOptions
// ============================================================================

/// Per-relay connection options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    /// Maximum time to wait for the WebSocket handshake.
    pub connect_timeout: Duration,

    /// Maximum sends waiting for an `OK` before new sends are rejected.
    pub max_pending_acks: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_pending_acks: DEFAULT_MAX_PENDING_ACKS,
        }
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the pending acknowledgment limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending_acks(mut self, max: usize) -> Self {
        self.max_pending_acks = max;
        self
    }

    /// Checks option values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero timeout or zero ack limit.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("connect_timeout must be non-zero"));
        }
        if self.max_pending_acks == 0 {
            return Err(Error::config("max_pending_acks must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// PoolConfig
// ============================================================================

/// Relay pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Watchdog delay for connections opened by
    /// [`RelayPool::send_to_selected_relays`](crate::RelayPool::send_to_selected_relays).
    pub publish_timeout: Duration,

    /// Drop inbound events whose id was already delivered by any relay.
    pub dedupe_events: bool,

    /// Number of event ids remembered when deduplicating.
    pub dedupe_capacity: usize,

    /// Options applied to relays the pool creates itself.
    pub relay: RelayOptions,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolConfig {
    /// Creates a configuration with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            dedupe_events: true,
            dedupe_capacity: DEFAULT_DEDUPE_CAPACITY,
            relay: RelayOptions::new(),
        }
    }

    /// Sets the publish watchdog delay.
    #[inline]
    #[must_use]
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Enables or disables inbound deduplication.
    #[inline]
    #[must_use]
    pub fn with_dedupe(mut self, enabled: bool) -> Self {
        self.dedupe_events = enabled;
        self
    }

    /// Sets the deduplication window.
    #[inline]
    #[must_use]
    pub fn with_dedupe_capacity(mut self, capacity: usize) -> Self {
        self.dedupe_capacity = capacity;
        self
    }

    /// Sets options for relays created by the pool.
    #[inline]
    #[must_use]
    pub fn with_relay_options(mut self, options: RelayOptions) -> Self {
        self.relay = options;
        self
    }

    /// Checks configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any value is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.publish_timeout.is_zero() {
            return Err(Error::config("publish_timeout must be non-zero"));
        }
        if self.dedupe_events && self.dedupe_capacity == 0 {
            return Err(Error::config(
                "dedupe_capacity must be at least 1 when deduplication is enabled",
            ));
        }
        self.relay.validate()
    }
}

// ============================================================================
// Tests
// ============================================================================
