//! Connection state machine for the single active socket.
//!
//! # Responsibilities
//! - Track connection state (Disconnected → Connecting → Connected,
//!   Reconnecting → Connected)
//! - Serialize connect attempts behind one lock
//! - Own the write half of the active socket
//! - Remember which node is active and the reconnect attempt counter

use arc_swap::ArcSwapOption;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::client::error::{BobError, BobResult};
use crate::events::{ConnectionEvent, EventSink};
use crate::node::NodeEndpoint;
use crate::rpc::FrameSink;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Read half handed to the receive loop.
pub type WsReader = SplitStream<WsStream>;
type WsWriter = SplitSink<WsStream, Message>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket and no attempt in progress.
    Disconnected,
    /// First connect attempt in progress.
    Connecting,
    /// Socket open; requests and notifications flow.
    Connected,
    /// Socket lost; the reconnect loop is running.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Owns the active socket.
pub struct ConnectionManager {
    state_tx: watch::Sender<ConnectionState>,
    connect_lock: Mutex<()>,
    writer: Mutex<Option<WsWriter>>,
    active: ArcSwapOption<NodeEndpoint>,
    reconnect_attempt: AtomicU32,
    events: EventSink,
    connect_timeout: Duration,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(events: EventSink, connect_timeout: Duration, shutdown: CancellationToken) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state_tx,
            connect_lock: Mutex::new(()),
            writer: Mutex::new(None),
            active: ArcSwapOption::empty(),
            reconnect_attempt: AtomicU32::new(0),
            events,
            connect_timeout,
            shutdown,
        }
    }

    /// Open a socket to `node` and make it the active one.
    ///
    /// At most one attempt runs at a time. A failed first attempt returns
    /// the manager to `Disconnected`; a failed attempt while reconnecting
    /// leaves it `Reconnecting`.
    pub async fn connect(&self, node: &Arc<NodeEndpoint>) -> BobResult<WsReader> {
        if self.shutdown.is_cancelled() {
            return Err(BobError::Shutdown);
        }
        let _guard = self.connect_lock.lock().await;

        let reconnecting = self.state() == ConnectionState::Reconnecting;
        if !reconnecting {
            self.set_state(ConnectionState::Connecting);
        }
        self.events.emit(ConnectionEvent::Connecting {
            node: node.label().to_string(),
        });
        tracing::info!(node = %node.label(), url = %node.ws_url, "Connecting");

        let attempt = tokio::select! {
            _ = self.shutdown.cancelled() => {
                self.set_state(ConnectionState::Disconnected);
                return Err(BobError::Shutdown);
            }
            res = tokio::time::timeout(self.connect_timeout, connect_async(node.ws_url.as_str())) => res,
        };

        let result = match attempt {
            Ok(Ok((stream, _response))) => Ok(stream),
            Ok(Err(e)) => Err(BobError::from(e)),
            Err(_) => Err(BobError::ConnectTimeout(self.connect_timeout.as_millis() as u64)),
        };

        match result {
            Ok(stream) => {
                let (sink, reader) = stream.split();
                if let Some(stale) = self.writer.lock().await.replace(sink) {
                    close_writer(stale).await;
                }
                self.active.store(Some(node.clone()));
                self.reconnect_attempt.store(0, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);

                tracing::info!(node = %node.label(), "Connected");
                self.events.emit(ConnectionEvent::Connected {
                    node: node.label().to_string(),
                });
                Ok(reader)
            }
            Err(e) => {
                if !reconnecting {
                    self.set_state(ConnectionState::Disconnected);
                }
                tracing::warn!(node = %node.label(), error = %e, "Connect failed");
                Err(e)
            }
        }
    }

    /// Enter `Reconnecting`. Does not wait for the writer.
    pub fn mark_reconnecting(&self) {
        self.set_state(ConnectionState::Reconnecting);
    }

    /// Drop the write half of the lost socket. Waits for an in-flight write
    /// to finish or hit its request deadline.
    pub async fn release_writer(&self) {
        if let Some(writer) = self.writer.lock().await.take() {
            close_writer(writer).await;
        }
    }

    /// Best-effort close of the active socket.
    pub async fn close(&self) {
        if let Some(writer) = self.writer.lock().await.take() {
            close_writer(writer).await;
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::debug!("Connection closed");
    }

    /// Hold the writer lock, as a stuck write would.
    #[cfg(test)]
    pub(crate) async fn hold_writer(&self) -> tokio::sync::MutexGuard<'_, Option<WsWriter>> {
        self.writer.lock().await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn active_node(&self) -> Option<Arc<NodeEndpoint>> {
        self.active.load_full()
    }

    /// Advance the reconnect attempt counter; the first call after a
    /// successful connect returns 1.
    pub fn next_attempt(&self) -> u32 {
        self.reconnect_attempt
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1)
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt.load(Ordering::SeqCst)
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Connection state changed");
        }
    }
}

async fn close_writer(mut writer: WsWriter) {
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await;
}

impl FrameSink for ConnectionManager {
    fn send_text(&self, text: String) -> BoxFuture<'_, BobResult<()>> {
        Box::pin(async move {
            if self.shutdown.is_cancelled() {
                return Err(BobError::Shutdown);
            }
            let mut writer = self.writer.lock().await;
            let Some(sink) = writer.as_mut() else {
                return Err(BobError::NotConnected);
            };
            sink.send(Message::Text(text.into())).await?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("active", &self.active_node().map(|n| n.label().to_string()))
            .field("reconnect_attempt", &self.reconnect_attempt())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use std::sync::Mutex as StdMutex;

    fn manager() -> (ConnectionManager, Arc<StdMutex<Vec<ConnectionEvent>>>) {
        let events = EventSink::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let s = seen.clone();
        events.add_observer(move |e| s.lock().unwrap().push(e.clone()));
        let manager = ConnectionManager::new(events, Duration::from_millis(500), CancellationToken::new());
        (manager, seen)
    }

    fn unreachable_node() -> Arc<NodeEndpoint> {
        // Port 9 on loopback: discard service, normally closed.
        Arc::new(NodeEndpoint::new(NodeId(0), "http://127.0.0.1:9", "/qubic", "/ws/qubic").unwrap())
    }

    #[test]
    fn test_initial_state() {
        let (manager, _) = manager();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.active_node().is_none());
    }

    #[test]
    fn test_attempt_counter() {
        let (manager, _) = manager();
        assert_eq!(manager.next_attempt(), 1);
        assert_eq!(manager.next_attempt(), 2);
        assert_eq!(manager.reconnect_attempt(), 2);
    }

    /// Loopback WebSocket server accepting any path; returns its base URL.
    async fn ws_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_successful_connect_resets_attempts() {
        use crate::resilience::calculate_backoff;

        let (manager, seen) = manager();
        let base = ws_server().await;
        let node = Arc::new(NodeEndpoint::new(NodeId(0), &base, "/qubic", "/ws/qubic").unwrap());

        manager.mark_reconnecting();
        for expected in 1..=3 {
            assert_eq!(manager.next_attempt(), expected);
        }

        let _reader = manager.connect(&node).await.unwrap();
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.reconnect_attempt(), 0);
        assert_eq!(manager.active_node().unwrap().id, NodeId(0));
        assert!(seen.lock().unwrap().contains(&ConnectionEvent::Connected { node: base.clone() }));

        // The next outage starts over at the initial delay.
        let initial = Duration::from_millis(50);
        let attempt = manager.next_attempt();
        assert_eq!(attempt, 1);
        assert_eq!(calculate_backoff(attempt, initial, Duration::from_secs(1)), initial);

        manager.send_text("{}".into()).await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_first_connect_returns_to_disconnected() {
        let (manager, seen) = manager();
        let result = manager.connect(&unreachable_node()).await;
        assert!(result.is_err());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            seen.lock().unwrap().first(),
            Some(&ConnectionEvent::Connecting { node: "http://127.0.0.1:9".into() })
        );
    }

    #[tokio::test]
    async fn test_failed_reconnect_stays_reconnecting() {
        let (manager, _) = manager();
        manager.mark_reconnecting();
        assert!(manager.connect(&unreachable_node()).await.is_err());
        assert_eq!(manager.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test]
    async fn test_send_without_socket() {
        let (manager, _) = manager();
        let err = manager.send_text("{}".into()).await.unwrap_err();
        assert!(matches!(err, BobError::NotConnected));
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_rejected() {
        let token = CancellationToken::new();
        let manager = ConnectionManager::new(EventSink::new(), Duration::from_secs(1), token.clone());
        token.cancel();
        assert!(matches!(
            manager.connect(&unreachable_node()).await,
            Err(BobError::Shutdown)
        ));
        assert!(matches!(
            manager.send_text("{}".into()).await,
            Err(BobError::Shutdown)
        ));
    }
}
