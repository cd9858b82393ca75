//! Publish watchdogs.
//!
//! A watchdog bounds a connection that was opened only to deliver one
//! publish. When its delay elapses and the relay is still connected, the
//! relay is disconnected and the send's completion callback runs. If the
//! relay already disconnected on its own, the watchdog does nothing.
//!
//! Every watchdog is a Tokio task tracked by a [`TaskTracker`] and
//! cancelled through a child of one root [`CancellationToken`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use crate::identifiers::RelayId;
use crate::relay::{DoneOnce, Relay};

// ============================================================================
// Watchdogs
// ============================================================================

/// Pool-scoped set of pending watchdogs.
#[derive(Debug, Default)]
pub(crate) struct Watchdogs {
    root: CancellationToken,
    tracker: TaskTracker,
    tasks: Mutex<FxHashMap<u64, (RelayId, CancellationToken)>>,
    next: AtomicU64,
}

impl Watchdogs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arms a watchdog for `relay` firing after `delay`.
    ///
    /// Must be called inside a Tokio runtime.
    pub(crate) fn schedule(self: &Arc<Self>, relay: Relay, delay: Duration, done: Option<DoneOnce>) {
        if self.root.is_cancelled() {
            trace!(relay_id = %relay.id(), "Watchdogs shut down, not scheduling");
            return;
        }

        let key = self.next.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        self.tasks.lock().insert(key, (relay.id(), token.clone()));
        debug!(relay_id = %relay.id(), delay_ms = delay.as_millis() as u64, "Watchdog armed");

        let this = Arc::clone(self);
        self.tracker.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    trace!(relay_id = %relay.id(), "Watchdog cancelled");
                }
                () = tokio::time::sleep(delay) => {
                    if relay.is_connected() {
                        debug!(relay_id = %relay.id(), url = %relay.url(), "Watchdog disconnecting relay");
                        relay.disconnect();
                        if let Some(done) = done {
                            done.fire();
                        }
                    } else {
                        trace!(relay_id = %relay.id(), "Relay already disconnected, watchdog idle");
                    }
                }
            }
            this.tasks.lock().remove(&key);
        });
    }

    /// Cancels every watchdog armed for `relay_id`.
    pub(crate) fn cancel_relay(&self, relay_id: RelayId) -> usize {
        let mut tasks = self.tasks.lock();
        let keys: Vec<u64> = tasks
            .iter()
            .filter(|(_, (id, _))| *id == relay_id)
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            if let Some((_, token)) = tasks.remove(key) {
                token.cancel();
            }
        }
        keys.len()
    }

    /// Cancels every pending watchdog; new ones may still be armed.
    pub(crate) fn cancel_pending(&self) -> usize {
        let drained: Vec<(RelayId, CancellationToken)> =
            self.tasks.lock().drain().map(|(_, entry)| entry).collect();
        for (_, token) in &drained {
            token.cancel();
        }
        drained.len()
    }

    /// Cancels everything permanently and waits for the tasks to exit.
    pub(crate) async fn shutdown(&self) {
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.tasks.lock().clear();
    }

    /// Cancels everything permanently without waiting.
    pub(crate) fn cancel_all(&self) {
        self.root.cancel();
        self.tracker.close();
    }

    /// Number of armed watchdogs.
    pub(crate) fn pending(&self) -> usize {
        self.tasks.lock().len()
    }
}

// ============================================================================
// Tests
// ============================================================================
