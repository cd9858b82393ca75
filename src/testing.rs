//! Test helpers: a localhost mock relay and polling utilities.
//!
//! The mock accepts any number of clients. For each client it records every
//! frame, answers `REQ` with `EOSE` and, while auto-ack is on, answers
//! `EVENT` with `OK`.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::protocol::Event;

// ============================================================================
// Tracing
// ============================================================================

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Polling
// ============================================================================

/// Polls `condition` every 10ms until it holds or `within` elapses.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Returns a `ws://` URL on a port nothing listens on.
pub(crate) async fn unreachable_url() -> String {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .expect("bind ephemeral port");
    let port = listener.local_addr().expect("ephemeral addr").port();
    drop(listener);
    format!("ws://127.0.0.1:{port}")
}

// ============================================================================
// Events
// ============================================================================

/// Builds an event with a fresh random id.
pub(crate) fn sample_event(kind: u32) -> Event {
    let id = format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    Event {
        id,
        pubkey: "ab".repeat(32),
        created_at: 1_700_000_000,
        kind,
        tags: Vec::new(),
        content: "test".into(),
        sig: "cd".repeat(64),
    }
}

// ============================================================================
// MockRelay
// ============================================================================

/// Commands broadcast to every client task.
#[derive(Debug, Clone)]
enum MockCommand {
    Push(String),
    CloseAll,
}

/// Shared state between the handle and client tasks.
struct MockState {
    received: Mutex<Vec<Value>>,
    auto_ack: AtomicBool,
    accepted: AtomicUsize,
    open: AtomicUsize,
}

/// Localhost relay server for tests.
pub(crate) struct MockRelay {
    url: String,
    state: Arc<MockState>,
    commands: broadcast::Sender<MockCommand>,
    shutdown: CancellationToken,
}

impl MockRelay {
    /// Binds to a random port and starts accepting clients.
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind mock relay");
        let port = listener.local_addr().expect("mock addr").port();

        let state = Arc::new(MockState {
            received: Mutex::new(Vec::new()),
            auto_ack: AtomicBool::new(true),
            accepted: AtomicUsize::new(0),
            open: AtomicUsize::new(0),
        });
        let (commands, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        tokio::spawn(Self::accept_loop(
            listener,
            Arc::clone(&state),
            commands.clone(),
            shutdown.clone(),
        ));

        Self {
            url: format!("ws://127.0.0.1:{port}"),
            state,
            commands,
            shutdown,
        }
    }

    /// Returns the relay URL.
    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Enables or disables automatic `OK` replies.
    pub(crate) fn set_auto_ack(&self, enabled: bool) {
        self.state.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Sends a frame to every connected client.
    pub(crate) fn push(&self, frame: Value) {
        let _ = self.commands.send(MockCommand::Push(frame.to_string()));
    }

    /// Closes every client socket from the server side.
    pub(crate) fn close_all(&self) {
        let _ = self.commands.send(MockCommand::CloseAll);
    }

    /// Returns every frame received so far.
    pub(crate) fn received(&self) -> Vec<Value> {
        self.state.received.lock().clone()
    }

    /// Returns the labels of every frame received so far.
    pub(crate) fn received_labels(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|frame| frame.get(0).and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Number of clients accepted since start.
    pub(crate) fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Number of clients currently connected.
    pub(crate) fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    async fn accept_loop(
        listener: TcpListener,
        state: Arc<MockState>,
        commands: broadcast::Sender<MockCommand>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { continue };
                    state.accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(Self::serve_client(
                        stream,
                        Arc::clone(&state),
                        commands.subscribe(),
                        shutdown.clone(),
                    ));
                }
            }
        }
    }

    async fn serve_client(
        stream: TcpStream,
        state: Arc<MockState>,
        mut commands: broadcast::Receiver<MockCommand>,
        shutdown: CancellationToken,
    ) {
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        state.open.fetch_add(1, Ordering::SeqCst);
        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Ok(MockCommand::Push(text)) => {
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(MockCommand::CloseAll) | Err(_) => {
                        let _ = write.close().await;
                        break;
                    }
                },
                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(_)) => continue,
                        _ => break,
                    };
                    let Ok(value) = serde_json::from_str::<Value>(&text) else { continue };
                    debug!(frame = %value, "Mock relay received frame");
                    state.received.lock().push(value.clone());

                    let reply = match value.get(0).and_then(Value::as_str) {
                        Some("REQ") => Some(json!(["EOSE", value[1]])),
                        Some("EVENT") if state.auto_ack.load(Ordering::SeqCst) => {
                            Some(json!(["OK", value[1]["id"], true, ""]))
                        }
                        _ => None,
                    };
                    if let Some(reply) = reply
                        && write.send(Message::Text(reply.to_string().into())).await.is_err()
                    {
                        break;
                    }
                }
            }
        }

        state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
