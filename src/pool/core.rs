//! Relay pool: owns the relay set and fans commands out to it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use nostr_relay_pool::{PoolEvent, RelayPool};
//!
//! let pool = RelayPool::new();
//! pool.load_urls(["wss://relay.damus.io", "wss://nos.lol"])?;
//!
//! let listener = Arc::new(|event: &PoolEvent| println!("{event:?}"));
//! pool.register(&listener);
//!
//! pool.request_and_watch()?;
//! let mut status = pool.subscribe_status();
//! status.changed().await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::identifiers::{ListenerId, RelayId, SubscriptionId};
use crate::protocol::{Event, Filter};
use crate::relay::{
    DoneCallback, LoadingCallback, Relay, RelayListener, RelayNotification, SendCallbacks,
    parse_relay_url,
};

use super::dedupe::EventDeduplicator;
use super::listener::{ListenerSet, PoolEvent, PoolListener};
use super::status::{RelayPoolStatus, StatusPublisher};
use super::watchdog::Watchdogs;

// ============================================================================
// SendReport
// ============================================================================

/// Outcome of a pool-wide publish.
#[derive(Debug, Default)]
pub struct SendReport {
    /// Relays the publish was attempted on.
    pub attempted: usize,
    /// Relays the frame was queued on immediately.
    pub sent: usize,
    /// Disconnected relays that will send once connected.
    pub deferred: usize,
    /// Relays that failed, with the reason.
    pub failures: Vec<(RelayId, Error)>,
}

impl SendReport {
    /// Returns `true` if no relay failed.
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

// ============================================================================
// PoolInner
// ============================================================================

/// State shared by every clone of a [`RelayPool`].
struct PoolInner {
    /// Self reference handed to relays as their listener.
    this: Weak<PoolInner>,
    /// Pool configuration.
    config: PoolConfig,
    /// Ordered relay set, copy-on-write.
    relays: RwLock<Arc<Vec<Relay>>>,
    /// External listeners.
    listeners: ListenerSet,
    /// Aggregate connectivity.
    status: StatusPublisher,
    /// Publish watchdogs.
    watchdogs: Arc<Watchdogs>,
    /// Inbound event filter, if enabled.
    dedupe: Option<EventDeduplicator>,
}

impl PoolInner {
    /// Returns the weak listener registration relays report to.
    fn as_listener(&self) -> Weak<dyn RelayListener> {
        self.this.clone()
    }

    /// Returns a snapshot of the relay set.
    fn snapshot(&self) -> Arc<Vec<Relay>> {
        Arc::clone(&*self.relays.read())
    }

    /// Recomputes and publishes status if it changed.
    ///
    /// The snapshot is read under the publisher's lock, so the last
    /// recompute always reflects the newest relay set.
    fn update_status(&self) {
        self.status.refresh(|| {
            let relays = self.snapshot();
            let connected = relays.iter().filter(|r| r.is_connected()).count();
            RelayPoolStatus::new(connected, relays.len())
        });
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.watchdogs.cancel_all();
    }
}

impl RelayListener for PoolInner {
    fn on_notification(&self, relay: &Relay, notification: RelayNotification) {
        let relay = relay.clone();
        let event = match notification {
            RelayNotification::Event {
                subscription_id,
                event,
                after_eose,
            } => {
                if let Some(dedupe) = &self.dedupe
                    && !dedupe.insert(&subscription_id, &event.id)
                {
                    return;
                }
                PoolEvent::Received {
                    relay,
                    subscription_id,
                    event,
                    after_eose,
                }
            }
            RelayNotification::Error {
                subscription_id,
                error,
            } => {
                self.update_status();
                PoolEvent::Errored {
                    relay,
                    subscription: subscription_id.map(|s| s.to_string()).unwrap_or_default(),
                    error,
                }
            }
            RelayNotification::StateChanged { state, channel } => {
                if state.affects_connectivity() {
                    self.update_status();
                }
                PoolEvent::StateChanged {
                    relay,
                    state,
                    channel,
                }
            }
            RelayNotification::SendResponse {
                event_id,
                success,
                message,
            } => PoolEvent::SendAcked {
                relay,
                event_id,
                success,
                message,
            },
            RelayNotification::Auth { challenge } => PoolEvent::AuthRequested { relay, challenge },
            RelayNotification::Notice { message } => PoolEvent::Notified { relay, message },
        };

        self.listeners.dispatch(&event);
    }
}

// ============================================================================
// RelayPool
// ============================================================================

/// Handle to a set of relays.
///
/// Cheap to clone; clones share state. Dropping the last handle cancels
/// pending watchdogs but leaves sockets to close as their relays drop.
#[derive(Clone)]
pub struct RelayPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayPool")
            .field("relays", &self.inner.snapshot().len())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RelayPool - Constructor
// ============================================================================

impl RelayPool {
    /// Creates an empty pool with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(PoolConfig::default())
    }

    /// Creates an empty pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` is invalid.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: PoolConfig) -> Self {
        let dedupe = config
            .dedupe_events
            .then(|| EventDeduplicator::new(config.dedupe_capacity));

        let inner = Arc::new_cyclic(|this| PoolInner {
            this: this.clone(),
            config,
            relays: RwLock::new(Arc::new(Vec::new())),
            listeners: ListenerSet::new(),
            status: StatusPublisher::new(),
            watchdogs: Arc::new(Watchdogs::new()),
            dedupe,
        });

        Self { inner }
    }
}

// ============================================================================
// RelayPool - Accessors
// ============================================================================

impl RelayPool {
    /// Returns the pool configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns a snapshot of the relays in insertion order.
    #[must_use]
    pub fn relays(&self) -> Vec<Relay> {
        self.inner.snapshot().to_vec()
    }

    /// Returns the first relay with `url`.
    #[must_use]
    pub fn get_relay(&self, url: &str) -> Option<Relay> {
        let url = parse_relay_url(url).ok()?;
        self.inner.snapshot().iter().find(|r| r.url() == &url).cloned()
    }

    /// Returns every relay with `url`, duplicates included.
    #[must_use]
    pub fn get_relays(&self, url: &str) -> Vec<Relay> {
        match parse_relay_url(url) {
            Ok(url) => self.relays_at(&url),
            Err(_) => Vec::new(),
        }
    }

    fn relays_at(&self, url: &Url) -> Vec<Relay> {
        self.inner
            .snapshot()
            .iter()
            .filter(|r| r.url() == url)
            .cloned()
            .collect()
    }

    /// Number of relays in the pool.
    #[must_use]
    pub fn available_relays(&self) -> usize {
        self.inner.snapshot().len()
    }

    /// Number of relays with an open socket.
    #[must_use]
    pub fn connected_relays(&self) -> usize {
        self.inner
            .snapshot()
            .iter()
            .filter(|r| r.is_connected())
            .count()
    }

    /// Returns the last published status.
    #[must_use]
    pub fn status(&self) -> RelayPoolStatus {
        self.inner.status.current()
    }

    /// Returns a receiver of status changes.
    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<RelayPoolStatus> {
        self.inner.status.subscribe()
    }

    /// Number of armed publish watchdogs.
    #[must_use]
    pub fn pending_watchdogs(&self) -> usize {
        self.inner.watchdogs.pending()
    }
}

// ============================================================================
// RelayPool - Relay Set
// ============================================================================

impl RelayPool {
    /// Adds `relay` and becomes its listener.
    pub fn add_relay(&self, relay: Relay) {
        relay.register(self.inner.as_listener());
        {
            let mut guard = self.inner.relays.write();
            let mut next = guard.as_ref().clone();
            next.push(relay.clone());
            *guard = Arc::new(next);
        }
        debug!(relay_id = %relay.id(), url = %relay.url(), "Relay added");
        self.inner.update_status();
    }

    /// Creates a relay for `url` with the pool's relay options and adds it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] for a non-WebSocket URL.
    pub fn add_url(&self, url: &str) -> Result<Relay> {
        let relay = Relay::with_options(url, self.inner.config.relay.clone())?;
        self.add_relay(relay.clone());
        Ok(relay)
    }

    /// Removes `relay` by identity. Returns `true` if it was in the pool.
    ///
    /// Its pending watchdogs are cancelled; the socket is left as is.
    pub fn remove_relay(&self, relay: &Relay) -> bool {
        relay.unregister(&self.inner.as_listener());

        let removed = {
            let mut guard = self.inner.relays.write();
            match guard.iter().position(|r| r == relay) {
                Some(index) => {
                    let mut next = guard.as_ref().clone();
                    next.remove(index);
                    *guard = Arc::new(next);
                    true
                }
                None => false,
            }
        };

        if removed {
            let cancelled = self.inner.watchdogs.cancel_relay(relay.id());
            debug!(relay_id = %relay.id(), url = %relay.url(), cancelled, "Relay removed");
            self.inner.update_status();
        }
        removed
    }

    /// Adds every relay in order.
    pub fn load_relays(&self, relays: impl IntoIterator<Item = Relay>) {
        let relays: Vec<Relay> = relays.into_iter().collect();
        for relay in &relays {
            relay.register(self.inner.as_listener());
        }
        {
            let mut guard = self.inner.relays.write();
            let mut next = guard.as_ref().clone();
            next.extend(relays.iter().cloned());
            *guard = Arc::new(next);
        }
        info!(count = relays.len(), "Relays loaded");
        self.inner.update_status();
    }

    /// Creates and adds a relay per URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] for the first invalid URL; nothing is
    /// added in that case.
    pub fn load_urls<I, S>(&self, urls: I) -> Result<Vec<Relay>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let relays = urls
            .into_iter()
            .map(|url| Relay::with_options(url.as_ref(), self.inner.config.relay.clone()))
            .collect::<Result<Vec<_>>>()?;
        self.load_relays(relays.iter().cloned());
        Ok(relays)
    }

    /// Detaches and drops every relay, cancelling pending watchdogs and
    /// forgetting delivered events.
    ///
    /// Sockets are not closed; former relays simply stop reporting.
    pub fn unload_relays(&self) {
        let listener = self.inner.as_listener();
        let former = {
            let mut guard = self.inner.relays.write();
            for relay in guard.iter() {
                relay.unregister(&listener);
            }
            mem::replace(&mut *guard, Arc::new(Vec::new()))
        };

        if let Some(dedupe) = &self.inner.dedupe {
            dedupe.clear();
        }
        let cancelled = self.inner.watchdogs.cancel_pending();
        info!(count = former.len(), cancelled, "Relays unloaded");
        self.inner.update_status();
    }
}

// ============================================================================
// RelayPool - Listeners
// ============================================================================

impl RelayPool {
    /// Registers a weakly held listener.
    ///
    /// Registering the same listener again returns its existing id.
    pub fn register<L>(&self, listener: &Arc<L>) -> ListenerId
    where
        L: PoolListener + 'static,
    {
        let weak: Weak<L> = Arc::downgrade(listener);
        self.inner.listeners.register(weak)
    }

    /// Removes a listener. Returns `true` if it was registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.inner.listeners.unregister(id)
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }
}

// ============================================================================
// RelayPool - Connection Commands
// ============================================================================

impl RelayPool {
    /// Connects every relay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a Tokio runtime.
    pub fn request_and_watch(&self) -> Result<()> {
        Handle::try_current().map_err(|_| Error::no_runtime("RelayPool::request_and_watch"))?;
        for relay in self.inner.snapshot().iter() {
            relay.connect()?;
        }
        Ok(())
    }

    /// Connects every disconnected relay; each replays its filters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a Tokio runtime.
    pub fn connect_and_send_filters_if_disconnected(&self) -> Result<()> {
        Handle::try_current().map_err(|_| {
            Error::no_runtime("RelayPool::connect_and_send_filters_if_disconnected")
        })?;
        for relay in self.inner.snapshot().iter() {
            relay.connect_and_send_filters_if_disconnected()?;
        }
        Ok(())
    }

    /// Disconnects every relay.
    pub fn disconnect(&self) {
        for relay in self.inner.snapshot().iter() {
            relay.disconnect();
        }
    }

    /// Cancels watchdogs, waits for them to exit, then disconnects every relay.
    pub async fn shutdown(&self) {
        self.inner.watchdogs.shutdown().await;
        self.disconnect();
        info!("Relay pool shut down");
    }
}

// ============================================================================
// RelayPool - Subscriptions
// ============================================================================

impl RelayPool {
    /// Registers a subscription on every relay.
    pub fn subscribe(&self, subscription_id: &SubscriptionId, filters: &[Filter]) {
        for relay in self.inner.snapshot().iter() {
            if let Err(e) = relay.subscribe(subscription_id.clone(), filters.to_vec()) {
                warn!(relay_id = %relay.id(), subscription_id = %subscription_id, error = %e, "Subscribe failed");
            }
        }
    }

    /// Re-issues `subscription_id` on every relay that has it.
    pub fn send_filter(&self, subscription_id: &SubscriptionId) {
        for relay in self.inner.snapshot().iter() {
            if let Err(e) = relay.send_filter(subscription_id) {
                debug!(relay_id = %relay.id(), subscription_id = %subscription_id, error = %e, "send_filter skipped");
            }
        }
    }

    /// Closes `subscription_id` on every relay.
    pub fn close(&self, subscription_id: &SubscriptionId) {
        for relay in self.inner.snapshot().iter() {
            if let Err(e) = relay.close(subscription_id) {
                warn!(relay_id = %relay.id(), subscription_id = %subscription_id, error = %e, "Close failed");
            }
        }
    }
}

// ============================================================================
// RelayPool - Publishing
// ============================================================================

impl RelayPool {
    /// Publishes `event` on every relay.
    ///
    /// Each relay gets its own callback set. Failures are collected in the
    /// report and never stop the remaining relays.
    pub fn send(
        &self,
        event: &Event,
        on_loading: Option<LoadingCallback>,
        on_done: Option<DoneCallback>,
    ) -> SendReport {
        let mut report = SendReport::default();
        for relay in self.inner.snapshot().iter() {
            report.attempted += 1;
            let callbacks = SendCallbacks::new(on_loading.clone(), on_done.clone());
            match relay.send(event, callbacks) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(relay_id = %relay.id(), url = %relay.url(), error = %e, "Send failed");
                    report.failures.push((relay.id(), e));
                }
            }
        }
        debug!(event_id = %event.id, attempted = report.attempted, sent = report.sent, "Event published");
        report
    }

    /// Publishes `event` on every pool relay whose URL is in `urls`.
    ///
    /// Connected relays send at once. Disconnected relays connect, send,
    /// and get a watchdog that disconnects them after the publish timeout
    /// and runs `on_done` if they are still connected by then.
    pub fn send_to_selected_relays<I, S>(
        &self,
        urls: I,
        event: &Event,
        on_loading: Option<LoadingCallback>,
        on_done: Option<DoneCallback>,
    ) -> SendReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = SendReport::default();

        for url in urls {
            let url = match parse_relay_url(url.as_ref()) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = url.as_ref(), error = %e, "Skipping invalid relay URL");
                    continue;
                }
            };

            for relay in self.relays_at(&url) {
                report.attempted += 1;
                let callbacks = SendCallbacks::new(on_loading.clone(), on_done.clone());

                if relay.is_connected() {
                    match relay.send(event, callbacks) {
                        Ok(()) => report.sent += 1,
                        Err(e) => report.failures.push((relay.id(), e)),
                    }
                    continue;
                }

                let watchdogs = Arc::clone(&self.inner.watchdogs);
                let timeout = self.inner.config.publish_timeout;
                let event = event.clone();
                let queued = relay.connect_and_run(move |relay| {
                    let done = callbacks.done();
                    if let Err(e) = relay.send(&event, callbacks) {
                        warn!(relay_id = %relay.id(), url = %relay.url(), error = %e, "Deferred send failed");
                    }
                    watchdogs.schedule(relay.clone(), timeout, done);
                });

                match queued {
                    Ok(()) => report.deferred += 1,
                    Err(e) => report.failures.push((relay.id(), e)),
                }
            }
        }

        debug!(
            event_id = %event.id,
            attempted = report.attempted,
            sent = report.sent,
            deferred = report.deferred,
            "Selective publish dispatched"
        );
        report
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use proptest::prelude::*;
    use serde_json::json;

    use crate::relay::StateType;
    use crate::testing::{MockRelay, init_tracing, sample_event, wait_until};

    const URL_A: &str = "wss://a.example.com";
    const URL_B: &str = "wss://b.example.com";

    fn fast_pool() -> RelayPool {
        RelayPool::with_config(PoolConfig::new().with_publish_timeout(Duration::from_millis(300)))
            .unwrap()
    }

    fn counter() -> (DoneCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let callback: DoneCallback = Arc::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (callback, count)
    }

    /// Listener counting events per variant.
    #[derive(Default)]
    struct Tally {
        received: AtomicUsize,
        errored: AtomicUsize,
        notified: AtomicUsize,
        eose: AtomicUsize,
    }

    impl PoolListener for Tally {
        fn handle(&self, event: &PoolEvent) {
            match event {
                PoolEvent::Received { .. } => {
                    self.received.fetch_add(1, Ordering::SeqCst);
                }
                PoolEvent::Errored { .. } => {
                    self.errored.fetch_add(1, Ordering::SeqCst);
                }
                PoolEvent::Notified { .. } => {
                    self.notified.fetch_add(1, Ordering::SeqCst);
                }
                PoolEvent::StateChanged {
                    state: StateType::Eose,
                    ..
                } => {
                    self.eose.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_duplicate_urls_are_distinct_relays() {
        let pool = RelayPool::new();
        let first = pool.add_url(URL_A).unwrap();
        let second = pool.add_url(URL_A).unwrap();
        pool.add_url(URL_B).unwrap();

        assert_eq!(pool.available_relays(), 3);
        assert_eq!(pool.get_relays(URL_A).len(), 2);
        assert_eq!(pool.status(), RelayPoolStatus::new(0, 3));

        assert!(pool.remove_relay(&first));
        assert!(!pool.remove_relay(&first));
        assert_eq!(pool.get_relays(URL_A), vec![second.clone()]);
        assert_eq!(pool.get_relay(URL_A), Some(second));
        assert_eq!(pool.status(), RelayPoolStatus::new(0, 2));
    }

    #[test]
    fn test_invalid_config_and_urls() {
        assert!(RelayPool::with_config(PoolConfig::new().with_publish_timeout(Duration::ZERO)).is_err());

        let pool = RelayPool::new();
        assert!(pool.add_url("http://a.example.com").is_err());
        assert!(pool.load_urls([URL_A, "nope"]).is_err());
        assert_eq!(pool.available_relays(), 0);
        assert!(pool.get_relays("nope").is_empty());
    }

    #[test]
    fn test_commands_require_runtime() {
        let pool = RelayPool::new();
        pool.add_url(URL_A).unwrap();
        assert!(matches!(pool.request_and_watch(), Err(Error::NoRuntime { .. })));
        assert!(matches!(
            pool.connect_and_send_filters_if_disconnected(),
            Err(Error::NoRuntime { .. })
        ));
    }

    #[test]
    fn test_send_reports_every_relay() {
        let pool = RelayPool::new();
        pool.load_urls([URL_A, URL_B]).unwrap();

        let report = pool.send(&sample_event(1), None, None);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|(_, e)| matches!(e, Error::NotConnected { .. })));
    }

    #[test]
    fn test_unload_detaches_listeners() {
        let pool = RelayPool::new();
        let relays = pool.load_urls([URL_A, URL_B]).unwrap();
        let tally = Arc::new(Tally::default());
        pool.register(&tally);

        relays[0].handle_message(crate::protocol::RelayMessage::Notice("before".into()));
        pool.unload_relays();
        for relay in &relays {
            relay.handle_message(crate::protocol::RelayMessage::Notice("after".into()));
            assert!(!relay.has_listener());
        }

        assert_eq!(tally.notified.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status(), RelayPoolStatus::new(0, 0));
    }

    fn deliveries(pool: &RelayPool) -> (Arc<impl PoolListener + 'static>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener = Arc::new(move |event: &PoolEvent| {
            if let PoolEvent::Received { subscription_id, .. } = event {
                sink.lock().push(subscription_id.to_string());
            }
        });
        pool.register(&listener);
        (listener, seen)
    }

    fn deliver(relay: &Relay, subscription: &str, event: &crate::protocol::Event) {
        relay.handle_message(crate::protocol::RelayMessage::Event {
            subscription_id: SubscriptionId::new(subscription),
            event: event.clone(),
        });
    }

    #[test]
    fn test_same_event_reaches_each_subscription() {
        let pool = RelayPool::new();
        let relays = pool.load_urls([URL_A, URL_B]).unwrap();
        let (_listener, seen) = deliveries(&pool);
        let event = sample_event(1);

        deliver(&relays[0], "inbox", &event);
        deliver(&relays[0], "feed", &event);
        deliver(&relays[1], "feed", &event);
        deliver(&relays[1], "inbox", &event);

        assert_eq!(*seen.lock(), vec!["inbox", "feed"]);
    }

    #[test]
    fn test_unload_forgets_delivered_events() {
        let pool = RelayPool::new();
        let (_listener, seen) = deliveries(&pool);
        let event = sample_event(1);

        let relay = pool.add_url(URL_A).unwrap();
        deliver(&relay, "feed", &event);
        deliver(&relay, "feed", &event);
        pool.unload_relays();

        let relay = pool.add_url(URL_A).unwrap();
        deliver(&relay, "feed", &event);

        assert_eq!(*seen.lock(), vec!["feed", "feed"]);
    }

    #[test]
    fn test_concurrent_membership_changes_settle_on_final_status() {
        let pool = RelayPool::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        let relay = pool.add_url(URL_A).unwrap();
                        pool.add_url(URL_B).unwrap();
                        assert!(pool.remove_relay(&relay));
                    }
                });
            }
        });

        assert_eq!(pool.available_relays(), 200);
        assert_eq!(pool.status(), RelayPoolStatus::new(0, 200));
    }

    #[test]
    fn test_eose_does_not_publish_status() {
        let pool = RelayPool::new();
        let relay = pool.add_url(URL_A).unwrap();
        let tally = Arc::new(Tally::default());
        pool.register(&tally);
        let published = pool.inner.status.published();

        relay.handle_message(crate::protocol::RelayMessage::Eose(SubscriptionId::new("s")));

        assert_eq!(tally.eose.load(Ordering::SeqCst), 1);
        assert_eq!(pool.inner.status.published(), published);
    }

    #[test]
    fn test_errors_recompute_status_without_publishing_duplicates() {
        let pool = RelayPool::new();
        let relay = pool.add_url(URL_A).unwrap();
        let tally = Arc::new(Tally::default());
        pool.register(&tally);
        let published = pool.inner.status.published();

        for _ in 0..3 {
            relay.handle_message(crate::protocol::RelayMessage::Closed {
                subscription_id: SubscriptionId::new("s"),
                message: "error: shutting down".into(),
            });
        }

        assert_eq!(tally.errored.load(Ordering::SeqCst), 3);
        assert_eq!(pool.inner.status.published(), published);
    }

    #[test]
    fn test_dropped_listener_is_not_kept_alive() {
        let pool = RelayPool::new();
        let tally = Arc::new(Tally::default());
        let id = pool.register(&tally);
        assert_eq!(pool.register(&tally), id);
        assert_eq!(pool.listener_count(), 1);

        drop(tally);
        assert_eq!(pool.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_send_reaches_every_relay() {
        init_tracing();
        let a = MockRelay::start().await;
        let b = MockRelay::start().await;
        let pool = RelayPool::new();
        pool.load_urls([a.url(), b.url()]).unwrap();
        pool.request_and_watch().unwrap();
        assert!(wait_until(|| pool.status().connected == 2, Duration::from_secs(2)).await);

        let (on_done, done) = counter();
        let report = pool.send(&sample_event(1), None, Some(on_done));
        assert_eq!((report.attempted, report.sent), (2, 2));

        assert!(wait_until(|| done.load(Ordering::SeqCst) == 2, Duration::from_secs(2)).await);
        assert_eq!(a.received_labels(), vec!["EVENT"]);
        assert_eq!(b.received_labels(), vec!["EVENT"]);
    }

    #[tokio::test]
    async fn test_selected_send_on_connected_relay_arms_no_watchdog() {
        init_tracing();
        let mock = MockRelay::start().await;
        let pool = fast_pool();
        let relay = pool.add_url(mock.url()).unwrap();
        pool.request_and_watch().unwrap();
        assert!(wait_until(|| relay.is_connected(), Duration::from_secs(2)).await);

        let report = pool.send_to_selected_relays([mock.url()], &sample_event(1), None, None);
        assert_eq!((report.sent, report.deferred), (1, 0));
        assert_eq!(pool.pending_watchdogs(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(relay.is_connected());
    }

    #[tokio::test]
    async fn test_watchdog_disconnects_and_completes_once() {
        init_tracing();
        let mock = MockRelay::start().await;
        mock.set_auto_ack(false);
        let pool = fast_pool();
        let relay = pool.add_url(mock.url()).unwrap();

        let (on_done, done) = counter();
        let report = pool.send_to_selected_relays([mock.url()], &sample_event(1), None, Some(on_done));
        assert_eq!(report.deferred, 1);

        assert!(wait_until(|| mock.received_labels() == vec!["EVENT"], Duration::from_secs(2)).await);
        assert_eq!(pool.pending_watchdogs(), 1);

        assert!(wait_until(|| done.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await);
        assert!(!relay.is_connected());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status(), RelayPoolStatus::new(0, 1));
    }

    #[tokio::test]
    async fn test_ack_and_watchdog_complete_once_together() {
        init_tracing();
        let mock = MockRelay::start().await;
        let pool = fast_pool();
        let relay = pool.add_url(mock.url()).unwrap();

        let (on_done, done) = counter();
        pool.send_to_selected_relays([mock.url()], &sample_event(1), None, Some(on_done));

        assert!(wait_until(|| done.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await);
        assert!(wait_until(|| !relay.is_connected(), Duration::from_secs(2)).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_watchdog_idle_after_remote_close() {
        init_tracing();
        let mock = MockRelay::start().await;
        mock.set_auto_ack(false);
        let pool = fast_pool();
        let relay = pool.add_url(mock.url()).unwrap();

        let (on_done, done) = counter();
        pool.send_to_selected_relays([mock.url()], &sample_event(1), None, Some(on_done));
        assert!(wait_until(|| mock.received_labels() == vec!["EVENT"], Duration::from_secs(2)).await);

        mock.close_all();
        assert!(wait_until(|| !relay.is_connected(), Duration::from_secs(2)).await);
        assert!(wait_until(|| pool.pending_watchdogs() == 0, Duration::from_secs(2)).await);
        assert_eq!(done.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_relay_cancels_its_watchdog() {
        init_tracing();
        let mock = MockRelay::start().await;
        mock.set_auto_ack(false);
        let pool = fast_pool();
        let relay = pool.add_url(mock.url()).unwrap();

        pool.send_to_selected_relays([mock.url()], &sample_event(1), None, None);
        assert!(wait_until(|| pool.pending_watchdogs() == 1, Duration::from_secs(2)).await);

        assert!(pool.remove_relay(&relay));
        assert_eq!(pool.pending_watchdogs(), 0);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(relay.is_connected());
        relay.disconnect();
    }

    #[tokio::test]
    async fn test_duplicate_events_dispatched_once() {
        init_tracing();
        let mock = MockRelay::start().await;
        let pool = RelayPool::new();
        pool.load_urls([mock.url(), mock.url()]).unwrap();
        let tally = Arc::new(Tally::default());
        pool.register(&tally);

        pool.subscribe(&SubscriptionId::new("feed"), &[Filter::new().kinds([1])]);
        pool.request_and_watch().unwrap();
        assert!(wait_until(|| tally.eose.load(Ordering::SeqCst) == 2, Duration::from_secs(2)).await);

        let event = sample_event(1);
        mock.push(json!(["EVENT", "feed", event]));
        assert!(wait_until(|| tally.received.load(Ordering::SeqCst) == 1, Duration::from_secs(2)).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(tally.received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_status_follows_connections() {
        init_tracing();
        let mock = MockRelay::start().await;
        let pool = RelayPool::new();
        pool.add_url(mock.url()).unwrap();
        let mut status = pool.subscribe_status();

        pool.request_and_watch().unwrap();
        tokio::time::timeout(Duration::from_secs(2), status.wait_for(RelayPoolStatus::is_connected))
            .await
            .expect("connected in time")
            .expect("pool alive");

        pool.shutdown().await;
        assert!(wait_until(|| !pool.status().is_connected(), Duration::from_secs(2)).await);
        assert_eq!(pool.status(), RelayPoolStatus::new(0, 1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(bool),
        Remove(usize),
        Unload,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => any::<bool>().prop_map(Op::Add),
            3 => any::<usize>().prop_map(Op::Remove),
            1 => Just(Op::Unload),
        ]
    }

    proptest! {
        #[test]
        fn prop_status_tracks_relay_set(ops in proptest::collection::vec(op(), 0..40)) {
            let pool = RelayPool::new();
            let mut model: Vec<Relay> = Vec::new();

            for op in ops {
                match op {
                    Op::Add(first) => {
                        let relay = pool.add_url(if first { URL_A } else { URL_B }).unwrap();
                        model.push(relay);
                    }
                    Op::Remove(index) => {
                        if !model.is_empty() {
                            let relay = model.remove(index % model.len());
                            prop_assert!(pool.remove_relay(&relay));
                        }
                    }
                    Op::Unload => {
                        pool.unload_relays();
                        model.clear();
                    }
                }

                let status = pool.status();
                prop_assert_eq!(status.available, model.len());
                prop_assert_eq!(pool.available_relays(), model.len());
                prop_assert!(status.connected <= status.available);
                prop_assert_eq!(pool.relays(), model.clone());
            }
        }
    }
}
