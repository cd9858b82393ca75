//! Relay handle: one logical connection to one relay URL.
//!
//! A [`Relay`] owns its socket, its active subscription filters and the
//! callbacks of sends awaiting an `OK`. Every externally observable
//! occurrence is reported once to the single registered
//! [`RelayListener`]; without a listener, notifications are dropped.
//!
//! # Example
//!
//! ```ignore
//! use nostr_relay_pool::{Filter, Relay, SubscriptionId};
//!
//! let relay = Relay::new("wss://relay.example.com")?;
//! relay.subscribe(SubscriptionId::new("inbox"), vec![Filter::new().kinds([24133])])?;
//! relay.connect()?; // replays "inbox" once open
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::RelayOptions;
use crate::error::{Error, Result};
use crate::identifiers::{RelayId, SubscriptionId};
use crate::protocol::{ClientMessage, Event, Filter, RelayMessage};
use crate::transport::{Connection, ConnectionEvent, MessageHandler};

use super::callbacks::SendCallbacks;
use super::notification::{RelayListener, RelayNotification};
use super::state::{AtomicState, ConnectionState, StateType};

// ============================================================================
// Types
// ============================================================================

/// Action deferred until the socket is usable.
type ReadyAction = Box<dyn FnOnce(&Relay) + Send>;

// ============================================================================
// RelayInner
// ============================================================================

/// Shared state behind every clone of a [`Relay`].
struct RelayInner {
    /// Identity; distinct for relays sharing a URL.
    id: RelayId,
    /// Endpoint.
    url: Url,
    /// Connection options.
    options: RelayOptions,
    /// Socket lifecycle.
    state: AtomicState,
    /// Bumped on every connect and disconnect; stale socket callbacks are ignored.
    generation: AtomicU64,
    /// Open socket, if any.
    connection: Mutex<Option<Connection>>,
    /// Active subscription filters.
    subscriptions: RwLock<FxHashMap<SubscriptionId, Vec<Filter>>>,
    /// Subscriptions that reached EOSE on the current socket.
    eose: Mutex<FxHashSet<SubscriptionId>>,
    /// Sends awaiting `OK`, keyed by event id.
    pending_acks: Mutex<FxHashMap<String, Vec<SendCallbacks>>>,
    /// Actions to run once connected.
    ready_actions: Mutex<Vec<ReadyAction>>,
    /// Single listener registration.
    listener: RwLock<Option<Weak<dyn RelayListener>>>,
}

// ============================================================================
// Relay
// ============================================================================

/// One logical relay connection.
///
/// Cheap to clone; clones share state. Equality is identity
/// ([`RelayId`]), never URL.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

impl PartialEq for Relay {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Relay {}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Relay - Constructor
// ============================================================================

impl Relay {
    /// Creates a disconnected relay with default options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] unless `url` is a `ws://` or `wss://` URL.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_options(url, RelayOptions::default())
    }

    /// Creates a disconnected relay with custom options.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] unless `url` is a `ws://` or `wss://` URL
    /// - [`Error::Config`] if `options` are invalid
    pub fn with_options(url: &str, options: RelayOptions) -> Result<Self> {
        options.validate()?;
        let url = parse_relay_url(url)?;

        Ok(Self {
            inner: Arc::new(RelayInner {
                id: RelayId::next(),
                url,
                options,
                state: AtomicState::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                connection: Mutex::new(None),
                subscriptions: RwLock::new(FxHashMap::default()),
                eose: Mutex::new(FxHashSet::default()),
                pending_acks: Mutex::new(FxHashMap::default()),
                ready_actions: Mutex::new(Vec::new()),
                listener: RwLock::new(None),
            }),
        })
    }
}

/// Parses and validates a relay URL.
pub(crate) fn parse_relay_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| Error::invalid_url(url, e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(Error::invalid_url(
            url,
            format!("scheme must be ws or wss, got {other}"),
        )),
    }
}

// ============================================================================
// Relay - Accessors
// ============================================================================

impl Relay {
    /// Returns the relay identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RelayId {
        self.inner.id
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Returns the connection options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &RelayOptions {
        &self.inner.options
    }

    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.load()
    }

    /// Returns `true` if the socket is open.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns the ids of all active subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.inner.subscriptions.read().keys().cloned().collect()
    }

    /// Returns `true` if `subscription_id` is active.
    #[must_use]
    pub fn has_subscription(&self, subscription_id: &SubscriptionId) -> bool {
        self.inner.subscriptions.read().contains_key(subscription_id)
    }

    /// Returns the number of sends awaiting `OK`.
    #[must_use]
    pub fn pending_ack_count(&self) -> usize {
        self.inner.pending_acks.lock().values().map(Vec::len).sum()
    }
}

// ============================================================================
// Relay - Listener Registration
// ============================================================================

impl Relay {
    /// Registers the listener, replacing any previous one.
    pub fn register(&self, listener: Weak<dyn RelayListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    /// Detaches `listener` if it is the registered one. Returns `true` if it was.
    pub fn unregister(&self, listener: &Weak<dyn RelayListener>) -> bool {
        let mut guard = self.inner.listener.write();
        match guard.as_ref() {
            Some(current) if Weak::ptr_eq(current, listener) => {
                *guard = None;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if a live listener is registered.
    #[must_use]
    pub fn has_listener(&self) -> bool {
        self.inner
            .listener
            .read()
            .as_ref()
            .is_some_and(|l| l.strong_count() > 0)
    }

    /// Delivers a notification to the listener, or drops it.
    fn notify(&self, notification: RelayNotification) {
        let listener = self.inner.listener.read().as_ref().and_then(Weak::upgrade);
        match listener {
            Some(listener) => listener.on_notification(self, notification),
            None => trace!(relay_id = %self.inner.id, "No listener, notification dropped"),
        }
    }
}

// ============================================================================
// Relay - Connection Lifecycle
// ============================================================================

impl Relay {
    /// Starts connecting in the background and returns immediately.
    ///
    /// Does nothing unless disconnected. Once open, every active
    /// subscription is replayed and queued
    /// [`connect_and_run`](Self::connect_and_run) actions run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a Tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let handle = Handle::try_current().map_err(|_| Error::no_runtime("Relay::connect"))?;

        if !self
            .inner
            .state
            .transition(ConnectionState::Disconnected, ConnectionState::Connecting)
        {
            trace!(relay_id = %self.inner.id, state = %self.state(), "Connect skipped");
            return Ok(());
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(relay_id = %self.inner.id, url = %self.inner.url, generation, "Connecting");

        let relay = self.clone();
        handle.spawn(async move { relay.open(generation).await });
        Ok(())
    }

    /// Runs `action` once the socket is usable, connecting if needed.
    ///
    /// Runs immediately when already connected. If the connection attempt
    /// fails, the action is dropped without running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a Tokio runtime.
    pub fn connect_and_run<F>(&self, action: F) -> Result<()>
    where
        F: FnOnce(&Relay) + Send + 'static,
    {
        Handle::try_current().map_err(|_| Error::no_runtime("Relay::connect_and_run"))?;

        {
            // Queueing and starting the attempt share one critical section
            // with every transition out of Connected.
            let mut actions = self.inner.ready_actions.lock();
            if !self.is_connected() {
                actions.push(Box::new(action));
                return self.connect();
            }
        }

        action(self);
        Ok(())
    }

    /// Connects and replays filters, unless already connected or connecting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoRuntime`] outside a Tokio runtime.
    pub fn connect_and_send_filters_if_disconnected(&self) -> Result<()> {
        if self.state() != ConnectionState::Disconnected {
            return Ok(());
        }
        self.connect()
    }

    /// Closes the socket. No-op when already disconnected.
    ///
    /// Pending `OK` callbacks and queued ready actions are discarded.
    pub fn disconnect(&self) {
        let discarded = {
            let mut actions = self.inner.ready_actions.lock();
            let previous = self.inner.state.swap(ConnectionState::Disconnected);
            if previous == ConnectionState::Disconnected {
                return;
            }
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            mem::take(&mut *actions)
        };

        if let Some(connection) = self.inner.connection.lock().take() {
            connection.shutdown();
        }
        self.reset_session(discarded);

        info!(relay_id = %self.inner.id, url = %self.inner.url, "Disconnected");
        self.notify(RelayNotification::StateChanged {
            state: StateType::Disconnect,
            channel: None,
        });
    }

    /// Background half of [`connect`](Self::connect).
    async fn open(&self, generation: u64) {
        let weak = Arc::downgrade(&self.inner);
        let handler: MessageHandler = Arc::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                Relay { inner }.on_connection_event(generation, event);
            }
        });

        let result = Connection::open(
            &self.inner.url,
            self.inner.options.connect_timeout,
            handler,
        )
        .await;

        match result {
            Ok(connection) => {
                {
                    let mut slot = self.inner.connection.lock();
                    if self.inner.generation.load(Ordering::SeqCst) != generation
                        || !self
                            .inner
                            .state
                            .transition(ConnectionState::Connecting, ConnectionState::Connected)
                    {
                        debug!(relay_id = %self.inner.id, "Connection superseded before open");
                        connection.shutdown();
                        return;
                    }
                    *slot = Some(connection);
                }

                info!(relay_id = %self.inner.id, url = %self.inner.url, "Connected");
                self.notify(RelayNotification::StateChanged {
                    state: StateType::Connect,
                    channel: None,
                });

                self.replay_filters();

                let actions = mem::take(&mut *self.inner.ready_actions.lock());
                for action in actions {
                    action(self);
                }
            }
            Err(error) => {
                let discarded = {
                    let mut actions = self.inner.ready_actions.lock();
                    if self.inner.generation.load(Ordering::SeqCst) != generation
                        || !self
                            .inner
                            .state
                            .transition(ConnectionState::Connecting, ConnectionState::Disconnected)
                    {
                        return;
                    }
                    mem::take(&mut *actions)
                };

                warn!(
                    relay_id = %self.inner.id,
                    url = %self.inner.url,
                    error = %error,
                    discarded = discarded.len(),
                    "Connection failed"
                );
                drop(discarded);
                self.notify(RelayNotification::Error {
                    subscription_id: None,
                    error: Arc::new(error),
                });
                self.notify(RelayNotification::StateChanged {
                    state: StateType::Disconnect,
                    channel: None,
                });
            }
        }
    }

    /// Routes an event-loop event, ignoring stale sockets.
    fn on_connection_event(&self, generation: u64, event: ConnectionEvent) {
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            trace!(relay_id = %self.inner.id, "Stale connection event ignored");
            return;
        }

        match event {
            ConnectionEvent::Message(message) => self.handle_message(message),
            ConnectionEvent::Closed(error) => {
                let discarded = {
                    let mut actions = self.inner.ready_actions.lock();
                    if self.inner.generation.load(Ordering::SeqCst) != generation
                        || self.inner.state.swap(ConnectionState::Disconnected)
                            == ConnectionState::Disconnected
                    {
                        return;
                    }
                    mem::take(&mut *actions)
                };

                self.inner.connection.lock().take();
                self.reset_session(discarded);

                if let Some(error) = error {
                    warn!(relay_id = %self.inner.id, url = %self.inner.url, error = %error, "Connection lost");
                    self.notify(RelayNotification::Error {
                        subscription_id: None,
                        error: Arc::new(error),
                    });
                } else {
                    info!(relay_id = %self.inner.id, url = %self.inner.url, "Connection closed by relay");
                }
                self.notify(RelayNotification::StateChanged {
                    state: StateType::Disconnect,
                    channel: None,
                });
            }
        }
    }

    /// Clears per-socket state.
    ///
    /// `discarded` holds the ready actions taken when the state left
    /// `Connected`; they are dropped unrun.
    fn reset_session(&self, discarded: Vec<ReadyAction>) {
        self.inner.eose.lock().clear();

        let dropped: usize = mem::take(&mut *self.inner.pending_acks.lock())
            .values()
            .map(Vec::len)
            .sum();
        if dropped > 0 || !discarded.is_empty() {
            debug!(
                relay_id = %self.inner.id,
                dropped,
                discarded = discarded.len(),
                "Discarded session state"
            );
        }
    }

    /// Handles one parsed relay frame.
    pub(crate) fn handle_message(&self, message: RelayMessage) {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let after_eose = self.inner.eose.lock().contains(&subscription_id);
                self.notify(RelayNotification::Event {
                    subscription_id,
                    event,
                    after_eose,
                });
            }
            RelayMessage::Eose(subscription_id) => {
                self.inner.eose.lock().insert(subscription_id.clone());
                self.notify(RelayNotification::StateChanged {
                    state: StateType::Eose,
                    channel: Some(subscription_id),
                });
            }
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => {
                let waiting = self.inner.pending_acks.lock().remove(&event_id);
                debug!(relay_id = %self.inner.id, event_id = %event_id, success, "OK received");
                self.notify(RelayNotification::SendResponse {
                    event_id,
                    success,
                    message,
                });
                for callbacks in waiting.into_iter().flatten() {
                    callbacks.complete();
                }
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                self.inner.eose.lock().remove(&subscription_id);
                self.notify(RelayNotification::Error {
                    subscription_id: Some(subscription_id.clone()),
                    error: Arc::new(Error::subscription_closed(subscription_id, message)),
                });
            }
            RelayMessage::Notice(message) => {
                self.notify(RelayNotification::Notice { message });
            }
            RelayMessage::Auth(challenge) => {
                self.notify(RelayNotification::Auth { challenge });
            }
        }
    }
}

// ============================================================================
// Relay - Publishing
// ============================================================================

impl Relay {
    /// Publishes `event` on the open socket.
    ///
    /// Regular events complete `callbacks` when the relay's `OK` arrives.
    /// Ephemeral events complete them as soon as the frame is queued.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the socket is not open (no auto-connect)
    /// - [`Error::TooManyPendingAcks`] if the ack limit is reached
    /// - [`Error::ConnectionClosed`] if the socket closed meanwhile
    pub fn send(&self, event: &Event, callbacks: SendCallbacks) -> Result<()> {
        let connection = self.open_connection()?;
        let frame = ClientMessage::Event(event.clone());

        if event.is_ephemeral() {
            connection.send(&frame)?;
            trace!(relay_id = %self.inner.id, event_id = %event.id, "Ephemeral event sent");
            callbacks.complete();
            return Ok(());
        }

        {
            let mut pending = self.inner.pending_acks.lock();
            let count: usize = pending.values().map(Vec::len).sum();
            let max = self.inner.options.max_pending_acks;
            if count >= max {
                warn!(relay_id = %self.inner.id, pending = count, max, "Too many pending acknowledgments");
                return Err(Error::TooManyPendingAcks {
                    pending: count,
                    max,
                });
            }
            pending.entry(event.id.clone()).or_default().push(callbacks);
        }

        if let Err(e) = connection.send(&frame) {
            let mut pending = self.inner.pending_acks.lock();
            if let Some(waiting) = pending.get_mut(&event.id) {
                waiting.pop();
                if waiting.is_empty() {
                    pending.remove(&event.id);
                }
            }
            return Err(e);
        }

        debug!(relay_id = %self.inner.id, event_id = %event.id, kind = event.kind, "Event sent");
        Ok(())
    }

    /// Answers an `AUTH` challenge with a signed authentication event.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the socket is not open
    /// - [`Error::ConnectionClosed`] if the socket closed meanwhile
    pub fn auth(&self, event: &Event) -> Result<()> {
        let connection = self.open_connection()?;
        connection.send(&ClientMessage::Auth(event.clone()))?;
        debug!(relay_id = %self.inner.id, event_id = %event.id, "AUTH sent");
        Ok(())
    }

    /// Returns the socket if connected.
    fn open_connection(&self) -> Result<Connection> {
        if !self.is_connected() {
            return Err(Error::not_connected(self.inner.url.as_str()));
        }
        self.inner
            .connection
            .lock()
            .clone()
            .ok_or_else(|| Error::not_connected(self.inner.url.as_str()))
    }
}

// ============================================================================
// Relay - Subscriptions
// ============================================================================

impl Relay {
    /// Registers a subscription and sends `REQ` if connected.
    ///
    /// Replaces the filters of an existing subscription with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket closed meanwhile.
    pub fn subscribe(&self, subscription_id: SubscriptionId, filters: Vec<Filter>) -> Result<()> {
        self.inner
            .subscriptions
            .write()
            .insert(subscription_id.clone(), filters);
        self.send_filter(&subscription_id)
    }

    /// Re-issues a registered subscription's `REQ`.
    ///
    /// Skipped while disconnected; filters are replayed on connect.
    ///
    /// # Errors
    ///
    /// - [`Error::SubscriptionNotFound`] if the id is not registered
    /// - [`Error::ConnectionClosed`] if the socket closed meanwhile
    pub fn send_filter(&self, subscription_id: &SubscriptionId) -> Result<()> {
        let filters = self
            .inner
            .subscriptions
            .read()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| Error::subscription_not_found(subscription_id.clone()))?;

        let Ok(connection) = self.open_connection() else {
            trace!(relay_id = %self.inner.id, subscription_id = %subscription_id, "Not connected, REQ deferred");
            return Ok(());
        };

        self.inner.eose.lock().remove(subscription_id);
        connection.send(&ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters,
        })?;
        debug!(relay_id = %self.inner.id, subscription_id = %subscription_id, "REQ sent");
        Ok(())
    }

    /// Cancels a subscription and sends `CLOSE` if connected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the socket closed meanwhile.
    pub fn close(&self, subscription_id: &SubscriptionId) -> Result<()> {
        let removed = self.inner.subscriptions.write().remove(subscription_id);
        self.inner.eose.lock().remove(subscription_id);

        if removed.is_none() {
            return Ok(());
        }
        if let Ok(connection) = self.open_connection() {
            connection.send(&ClientMessage::Close(subscription_id.clone()))?;
            debug!(relay_id = %self.inner.id, subscription_id = %subscription_id, "CLOSE sent");
        }
        Ok(())
    }

    /// Sends `REQ` for every active subscription.
    fn replay_filters(&self) {
        let ids: Vec<SubscriptionId> = self.subscriptions();
        for id in ids {
            if let Err(e) = self.send_filter(&id) {
                warn!(relay_id = %self.inner.id, subscription_id = %id, error = %e, "Filter replay failed");
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
