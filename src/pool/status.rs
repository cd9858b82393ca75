//! Aggregate pool connectivity.
//!
//! The status is published through a [`tokio::sync::watch`] channel.
//! Recomputations that produce the current value are coalesced: observers
//! are woken only when the value actually changes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::debug;

// ============================================================================
// RelayPoolStatus
// ============================================================================

/// Pool connectivity summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RelayPoolStatus {
    /// Relays with an open socket.
    pub connected: usize,
    /// Relays in the pool.
    pub available: usize,
}

impl RelayPoolStatus {
    /// Creates a status value.
    #[inline]
    #[must_use]
    pub const fn new(connected: usize, available: usize) -> Self {
        Self {
            connected,
            available,
        }
    }

    /// Returns `true` if at least one relay is connected.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected > 0
    }
}

// ============================================================================
// StatusPublisher
// ============================================================================

/// Holds the current status and notifies observers on change.
#[derive(Debug)]
pub(crate) struct StatusPublisher {
    sender: watch::Sender<RelayPoolStatus>,
    published: AtomicU64,
}

impl StatusPublisher {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(RelayPoolStatus::default());
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Returns a receiver that observes future changes.
    pub(crate) fn subscribe(&self) -> watch::Receiver<RelayPoolStatus> {
        self.sender.subscribe()
    }

    /// Returns the last published status.
    pub(crate) fn current(&self) -> RelayPoolStatus {
        *self.sender.borrow()
    }

    /// Recomputes the status and publishes it if it differs.
    ///
    /// `compute` runs while the channel is locked, so concurrent refreshes
    /// publish in the order their inputs were read.
    ///
    /// Returns `true` if a new value was published.
    pub(crate) fn refresh(&self, compute: impl FnOnce() -> RelayPoolStatus) -> bool {
        let mut next = RelayPoolStatus::default();
        let changed = self.sender.send_if_modified(|status| {
            next = compute();
            if *status == next {
                return false;
            }
            *status = next;
            true
        });

        if changed {
            self.published.fetch_add(1, Ordering::Relaxed);
            debug!(
                connected = next.connected,
                available = next.available,
                "Pool status changed"
            );
        }
        changed
    }

    /// Number of values published since creation.
    pub(crate) fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_values_are_coalesced() {
        let publisher = StatusPublisher::new();

        assert!(!publisher.refresh(RelayPoolStatus::default));
        assert!(publisher.refresh(|| RelayPoolStatus::new(0, 2)));
        assert!(!publisher.refresh(|| RelayPoolStatus::new(0, 2)));
        assert!(publisher.refresh(|| RelayPoolStatus::new(1, 2)));

        assert_eq!(publisher.published(), 2);
        assert_eq!(publisher.current(), RelayPoolStatus::new(1, 2));
    }

    #[tokio::test]
    async fn test_subscriber_sees_changes_only() {
        let publisher = StatusPublisher::new();
        let mut receiver = publisher.subscribe();

        publisher.refresh(|| RelayPoolStatus::new(0, 1));
        assert!(receiver.has_changed().unwrap());
        assert_eq!(*receiver.borrow_and_update(), RelayPoolStatus::new(0, 1));

        publisher.refresh(|| RelayPoolStatus::new(0, 1));
        assert!(!receiver.has_changed().unwrap());
    }

    #[test]
    fn test_changed_resolves_after_publish() {
        let publisher = StatusPublisher::new();
        let mut receiver = publisher.subscribe();

        publisher.refresh(|| RelayPoolStatus::new(1, 1));
        tokio_test::block_on(receiver.changed()).expect("sender alive");
        assert!(receiver.borrow().is_connected());
    }

    #[test]
    fn test_slow_refresh_cannot_overwrite_newer_value() {
        let publisher = StatusPublisher::new();
        let source = AtomicU64::new(1);
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                publisher.refresh(|| {
                    let connected = source.load(Ordering::SeqCst) as usize;
                    started_tx.send(()).unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    RelayPoolStatus::new(connected, 2)
                });
            });

            started_rx.recv().unwrap();
            source.store(2, Ordering::SeqCst);
            publisher.refresh(|| RelayPoolStatus::new(source.load(Ordering::SeqCst) as usize, 2));
        });

        assert_eq!(publisher.current(), RelayPoolStatus::new(2, 2));
        assert_eq!(publisher.published(), 2);
    }

    #[test]
    fn test_is_connected() {
        assert!(!RelayPoolStatus::new(0, 3).is_connected());
        assert!(RelayPoolStatus::new(1, 3).is_connected());
    }
}
