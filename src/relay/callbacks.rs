//! Per-send completion callbacks.
//!
//! Callbacks travel with each send instead of living on the relay, so
//! concurrent sends never overwrite each other's callbacks.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// Types
// ============================================================================

/// Loading indicator callback. Receives `false` when a send completes.
pub type LoadingCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Completion callback.
pub type DoneCallback = Arc<dyn Fn() + Send + Sync>;

// ============================================================================
// DoneOnce
// ============================================================================

/// Completion callback that runs at most once across all clones.
#[derive(Clone)]
pub struct DoneOnce {
    fired: Arc<AtomicBool>,
    callback: DoneCallback,
}

impl DoneOnce {
    /// Wraps `callback` in a fresh once-guard.
    #[must_use]
    pub fn new(callback: DoneCallback) -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            callback,
        }
    }

    /// Runs the callback unless a clone already did. Returns `true` if it ran.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        (self.callback)();
        true
    }

    /// Returns `true` once the callback has run.
    #[inline]
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for DoneOnce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoneOnce")
            .field("fired", &self.has_fired())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SendCallbacks
// ============================================================================

/// Callbacks attached to one send on one relay.
#[derive(Clone, Default)]
pub struct SendCallbacks {
    on_loading: Option<LoadingCallback>,
    on_done: Option<DoneOnce>,
}

impl SendCallbacks {
    /// Creates callbacks with a fresh once-guard around `on_done`.
    #[must_use]
    pub fn new(on_loading: Option<LoadingCallback>, on_done: Option<DoneCallback>) -> Self {
        Self {
            on_loading,
            on_done: on_done.map(DoneOnce::new),
        }
    }

    /// Callbacks that do nothing.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns the shared once-guard, if a completion callback is set.
    #[inline]
    #[must_use]
    pub fn done(&self) -> Option<DoneOnce> {
        self.on_done.clone()
    }

    /// Signals completion: `on_loading(false)`, then `on_done`.
    pub fn complete(&self) {
        if let Some(on_loading) = &self.on_loading {
            on_loading(false);
        }
        if let Some(on_done) = &self.on_done {
            on_done.fire();
        }
    }
}

impl fmt::Debug for SendCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendCallbacks")
            .field("on_loading", &self.on_loading.is_some())
            .field("on_done", &self.on_done)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
