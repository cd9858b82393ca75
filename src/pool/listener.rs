//! Pool-wide listener registry.
//!
//! Listeners are held weakly: dropping the last strong reference
//! unregisters them implicitly. Dispatch iterates a snapshot taken when
//! dispatch starts, so listeners registered or removed meanwhile take
//! effect from the next event.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use crate::error::Error;
use crate::identifiers::{ListenerId, SubscriptionId};
use crate::protocol::Event;
use crate::relay::{Relay, StateType};

// ============================================================================
// PoolEvent
// ============================================================================

/// Event broadcast to every pool listener.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// Event received on a subscription.
    Received {
        /// Originating relay.
        relay: Relay,
        /// Subscription the event matched.
        subscription_id: SubscriptionId,
        /// The event.
        event: Event,
        /// `true` if the subscription had already reached EOSE.
        after_eose: bool,
    },

    /// Relay or subscription failure.
    Errored {
        /// Originating relay.
        relay: Relay,
        /// Subscription context, empty for socket-level failures.
        subscription: String,
        /// The failure.
        error: Arc<Error>,
    },

    /// Relay connection transition or EOSE.
    StateChanged {
        /// Originating relay.
        relay: Relay,
        /// Kind of transition.
        state: StateType,
        /// Subscription the transition concerns.
        channel: Option<SubscriptionId>,
    },

    /// `OK` received for a published event.
    SendAcked {
        /// Originating relay.
        relay: Relay,
        /// Acknowledged event id.
        event_id: String,
        /// Whether the relay accepted the event.
        success: bool,
        /// Relay message.
        message: String,
    },

    /// Authentication challenge.
    AuthRequested {
        /// Originating relay.
        relay: Relay,
        /// Challenge to sign.
        challenge: String,
    },

    /// Relay notice.
    Notified {
        /// Originating relay.
        relay: Relay,
        /// Notice text.
        message: String,
    },
}

impl PoolEvent {
    /// Returns the originating relay.
    #[must_use]
    pub fn relay(&self) -> &Relay {
        match self {
            Self::Received { relay, .. }
            | Self::Errored { relay, .. }
            | Self::StateChanged { relay, .. }
            | Self::SendAcked { relay, .. }
            | Self::AuthRequested { relay, .. }
            | Self::Notified { relay, .. } => relay,
        }
    }
}

// ============================================================================
// PoolListener
// ============================================================================

/// Observer of pool-wide events.
///
/// Called synchronously; implementations must not block.
pub trait PoolListener: Send + Sync {
    /// Handles one event.
    fn handle(&self, event: &PoolEvent);
}

impl<F> PoolListener for F
where
    F: Fn(&PoolEvent) + Send + Sync,
{
    fn handle(&self, event: &PoolEvent) {
        self(event);
    }
}

// ============================================================================
// ListenerSet
// ============================================================================

type Entry = (ListenerId, Weak<dyn PoolListener>);

/// Copy-on-write set of weak listener registrations.
#[derive(Default)]
pub(crate) struct ListenerSet {
    entries: RwLock<Arc<Vec<Entry>>>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` unless already present. Returns its id.
    pub(crate) fn register(&self, listener: Weak<dyn PoolListener>) -> ListenerId {
        let mut guard = self.entries.write();
        if let Some((id, _)) = guard.iter().find(|(_, l)| Weak::ptr_eq(l, &listener)) {
            return *id;
        }

        let id = ListenerId::next();
        let mut next = live_entries(&guard, None);
        next.push((id, listener));
        *guard = Arc::new(next);
        id
    }

    /// Removes a registration. Returns `true` if it was present.
    pub(crate) fn unregister(&self, id: ListenerId) -> bool {
        let mut guard = self.entries.write();
        if !guard.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        *guard = Arc::new(live_entries(&guard, Some(id)));
        true
    }

    /// Drops registrations whose listener is gone.
    fn prune(&self) {
        let mut guard = self.entries.write();
        if guard.iter().all(|(_, l)| l.strong_count() > 0) {
            return;
        }
        let next = live_entries(&guard, None);
        trace!(removed = guard.len() - next.len(), "Pruned dropped listeners");
        *guard = Arc::new(next);
    }

    /// Delivers `event` to every live listener in registration order.
    pub(crate) fn dispatch(&self, event: &PoolEvent) {
        let snapshot = Arc::clone(&*self.entries.read());
        let mut dropped = false;
        for (id, listener) in snapshot.iter() {
            match listener.upgrade() {
                Some(listener) => listener.handle(event),
                None => {
                    trace!(listener_id = ?id, "Skipping dropped listener");
                    dropped = true;
                }
            }
        }
        if dropped {
            self.prune();
        }
    }

    /// Number of live registrations.
    pub(crate) fn len(&self) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|(_, l)| l.strong_count() > 0)
            .count()
    }
}

/// Live registrations of `entries`, minus `skip`.
fn live_entries(entries: &[Entry], skip: Option<ListenerId>) -> Vec<Entry> {
    entries
        .iter()
        .filter(|(id, l)| Some(*id) != skip && l.strong_count() > 0)
        .cloned()
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    fn notice(relay: &Relay) -> PoolEvent {
        PoolEvent::Notified {
            relay: relay.clone(),
            message: "hi".into(),
        }
    }

    fn weak_of<L: PoolListener + 'static>(listener: &Arc<L>) -> Weak<dyn PoolListener> {
        let weak: Weak<L> = Arc::downgrade(listener);
        weak
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let relay = Relay::new("wss://relay.example.com").unwrap();
        let set = ListenerSet::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&order);
        let first = Arc::new(move |_: &PoolEvent| first_log.lock().push(1));
        let second_log = Arc::clone(&order);
        let second = Arc::new(move |_: &PoolEvent| second_log.lock().push(2));

        set.register(weak_of(&first));
        set.register(weak_of(&second));
        set.dispatch(&notice(&relay));

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let set = ListenerSet::new();
        let listener = Arc::new(|_: &PoolEvent| {});

        let a = set.register(weak_of(&listener));
        let b = set.register(weak_of(&listener));
        assert_eq!(a, b);
        assert_eq!(set.len(), 1);

        assert!(set.unregister(a));
        assert!(!set.unregister(a));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_dropped_listener_is_not_called() {
        let relay = Relay::new("wss://relay.example.com").unwrap();
        let set = ListenerSet::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let listener = Arc::new(move |_: &PoolEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        set.register(weak_of(&listener));
        drop(listener);

        set.dispatch(&notice(&relay));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_dropped_registrations_are_released() {
        let relay = Relay::new("wss://relay.example.com").unwrap();
        let set = ListenerSet::new();
        let kept = Arc::new(|_: &PoolEvent| {});
        let kept_id = set.register(weak_of(&kept));

        let gone = Arc::new(|_: &PoolEvent| {});
        set.register(weak_of(&gone));
        drop(gone);
        set.dispatch(&notice(&relay));
        assert_eq!(set.entries.read().len(), 1);

        let other = Arc::new(|_: &PoolEvent| {});
        set.register(weak_of(&other));
        drop(other);
        assert!(set.unregister(kept_id));
        assert!(set.entries.read().is_empty());
    }

    #[test]
    fn test_listener_added_during_dispatch_misses_current_event() {
        let relay = Relay::new("wss://relay.example.com").unwrap();
        let set = Arc::new(ListenerSet::new());
        let late_calls = Arc::new(AtomicUsize::new(0));
        let keep_alive: Arc<Mutex<Vec<Arc<dyn PoolListener>>>> = Arc::new(Mutex::new(Vec::new()));

        let registry = Arc::clone(&set);
        let counter = Arc::clone(&late_calls);
        let holder = Arc::clone(&keep_alive);
        let registrar = Arc::new(move |_: &PoolEvent| {
            let counter = Arc::clone(&counter);
            let late: Arc<dyn PoolListener> = Arc::new(move |_: &PoolEvent| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            registry.register(Arc::downgrade(&late));
            holder.lock().push(late);
        });
        set.register(weak_of(&registrar));

        set.dispatch(&notice(&relay));
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);

        set.dispatch(&notice(&relay));
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_exposes_relay() {
        let relay = Relay::new("wss://relay.example.com").unwrap();
        assert_eq!(notice(&relay).relay(), &relay);
    }
}
