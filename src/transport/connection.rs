//! WebSocket connection and event loop.
//!
//! This module owns one client socket to one relay. It has no notion of
//! subscriptions or acknowledgments; it turns frames into
//! [`RelayMessage`]s and hands them to a handler, and serializes
//! [`ClientMessage`]s onto the socket.
//!
//! # Event Loop
//!
//! [`Connection::open`] spawns a tokio task that handles:
//!
//! - Incoming frames from the relay (parsed, then passed to the handler)
//! - Outgoing frames queued by [`Connection::send`]
//! - Shutdown requests
//!
//! When the socket ends for any reason other than [`Connection::shutdown`],
//! the handler receives exactly one [`ConnectionEvent::Closed`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, RelayMessage};

// ============================================================================
// Types
// ============================================================================

/// Client socket type.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handler invoked from the event loop task for every connection event.
pub type MessageHandler = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

// ============================================================================
// ConnectionEvent
// ============================================================================

/// Events delivered by the event loop.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A parsed relay frame.
    Message(RelayMessage),

    /// The socket ended. Carries the error if it ended abnormally.
    Closed(Option<Error>),
}

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a serialized frame.
    Send(String),
    /// Close the socket without reporting `Closed`.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// Open WebSocket connection to one relay.
///
/// Cheap to clone; all clones feed the same event loop. The loop exits when
/// [`shutdown`](Self::shutdown) is called, the socket ends, or the last
/// clone is dropped.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl Connection {
    /// Opens a socket to `url` and spawns its event loop.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the handshake exceeds `connect_timeout`
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn open(url: &Url, connect_timeout: Duration, handler: MessageHandler) -> Result<Self> {
        let (ws_stream, _response) = timeout(connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::connection_timeout(connect_timeout.as_millis() as u64))??;

        info!(url = %url, "Relay socket opened");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_event_loop(
            url.clone(),
            ws_stream,
            command_rx,
            handler,
        ));

        Ok(Self { command_tx })
    }

    /// Queues a frame for sending.
    ///
    /// Returns once the frame is queued; write failures surface as
    /// [`ConnectionEvent::Closed`].
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the frame fails to serialize
    /// - [`Error::ConnectionClosed`] if the event loop has exited
    pub fn send(&self, message: &ClientMessage) -> Result<()> {
        let json = message.to_json()?;
        trace!(frame = message.label(), len = json.len(), "Frame queued");
        self.command_tx
            .send(ConnectionCommand::Send(json))
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Returns `true` once the event loop has exited.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Closes the socket.
    ///
    /// The handler is not notified; the caller already knows.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        url: Url,
        ws_stream: WsStream,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        handler: MessageHandler,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut closed: Option<Option<Error>> = None;

        loop {
            tokio::select! {
                // Incoming frames from relay
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            trace!(url = %url, len = text.len(), "Frame received");
                            match RelayMessage::from_json(&text) {
                                Ok(message) => handler(ConnectionEvent::Message(message)),
                                Err(e) => warn!(url = %url, error = %e, "Ignoring unparseable frame"),
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(url = %url, "WebSocket closed by relay");
                            closed = Some(None);
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(url = %url, error = %e, "WebSocket error");
                            closed = Some(Some(Error::from(e)));
                            break;
                        }

                        None => {
                            debug!(url = %url, "WebSocket stream ended");
                            closed = Some(None);
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the relay handle
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(json)) => {
                            if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                warn!(url = %url, error = %e, "Failed to write frame");
                                closed = Some(Some(Error::from(e)));
                                break;
                            }
                            trace!(url = %url, "Frame sent");
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!(url = %url, "Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!(url = %url, "Command channel closed");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        if let Some(error) = closed {
            handler(ConnectionEvent::Closed(error));
        }

        info!(url = %url, "Relay socket closed");
    }
}

// ============================================================================
// Tests
// ============================================================================
