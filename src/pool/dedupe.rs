//! Bounded FIFO set of seen `(subscription, event)` pairs.
//!
//! The same event arriving on two subscriptions is delivered on both; only
//! repeats for the same subscription (typically from other relays) are
//! dropped.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use crate::identifiers::SubscriptionId;

// ============================================================================
// Types
// ============================================================================

type Key = (SubscriptionId, String);

// ============================================================================
// EventDeduplicator
// ============================================================================

/// Remembers the most recent `capacity` deliveries.
///
/// The oldest entry is forgotten first once the capacity is reached.
#[derive(Debug)]
pub struct EventDeduplicator {
    capacity: usize,
    seen: Mutex<Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    keys: FxHashSet<Key>,
    order: VecDeque<Key>,
}

impl EventDeduplicator {
    /// Creates a deduplicator remembering up to `capacity` deliveries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    /// Records `event_id` on `subscription_id`. Returns `true` the first time.
    pub fn insert(&self, subscription_id: &SubscriptionId, event_id: &str) -> bool {
        let key = (subscription_id.clone(), event_id.to_string());
        let mut seen = self.seen.lock();
        if seen.keys.contains(&key) {
            return false;
        }

        if seen.order.len() >= self.capacity
            && let Some(oldest) = seen.order.pop_front()
        {
            seen.keys.remove(&oldest);
        }
        seen.keys.insert(key.clone());
        seen.order.push_back(key);
        true
    }

    /// Number of remembered deliveries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().order.len()
    }

    /// Returns `true` if nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets everything.
    pub fn clear(&self) {
        let mut seen = self.seen.lock();
        seen.keys.clear();
        seen.order.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================
