//! Notifications a relay reports to its listener.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::error::Error;
use crate::identifiers::SubscriptionId;
use crate::protocol::Event;

use super::{Relay, StateType};

// ============================================================================
// RelayNotification
// ============================================================================

/// One externally observable relay occurrence.
#[derive(Debug, Clone)]
pub enum RelayNotification {
    /// Event delivered for a subscription.
    Event {
        /// Subscription the event matched.
        subscription_id: SubscriptionId,
        /// The event.
        event: Event,
        /// `true` if the subscription already reached EOSE (live event).
        after_eose: bool,
    },

    /// Failure on the socket or a subscription.
    Error {
        /// Affected subscription, `None` for socket-level failures.
        subscription_id: Option<SubscriptionId>,
        /// The failure.
        error: Arc<Error>,
    },

    /// Connection transition or EOSE milestone.
    StateChanged {
        /// Kind of transition.
        state: StateType,
        /// Subscription the transition concerns (set for EOSE).
        channel: Option<SubscriptionId>,
    },

    /// `OK` acknowledgment of a published event.
    SendResponse {
        /// Acknowledged event id.
        event_id: String,
        /// Whether the relay accepted it.
        success: bool,
        /// Relay message.
        message: String,
    },

    /// Authentication challenge.
    Auth {
        /// Challenge string to sign.
        challenge: String,
    },

    /// Free-text notice.
    Notice {
        /// Notice text.
        message: String,
    },
}

// ============================================================================
// RelayListener
// ============================================================================

/// Receiver of a relay's notifications.
///
/// Called synchronously on the task that observed the occurrence, usually
/// the socket event loop. Implementations must not block.
pub trait RelayListener: Send + Sync {
    /// Handles one notification from `relay`.
    fn on_notification(&self, relay: &Relay, notification: RelayNotification);
}
