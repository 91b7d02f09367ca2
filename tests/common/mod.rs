//! Shared utilities for integration testing: a scripted Bob node.

#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bob_client::config::ClientConfig;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub const CHAIN_ID: u64 = 2025;

/// Instruction for every open socket of a mock node.
#[derive(Debug, Clone)]
pub enum Command {
    Push { subscription: String, result: Value },
    Drop,
}

pub struct MockState {
    pub tick: AtomicU64,
    pub healthy: AtomicBool,
    /// Record subscribes but never answer them.
    pub hold_subscribes: AtomicBool,
    pub connections: AtomicUsize,
    /// Params object of every `qubic_subscribe`, in arrival order.
    pub subscribes: Mutex<Vec<Value>>,
    /// Server id of every `qubic_unsubscribe`.
    pub unsubscribes: Mutex<Vec<String>>,
    next_subscription: AtomicU64,
    commands: broadcast::Sender<Command>,
}

/// A Bob node on an ephemeral loopback port.
pub struct MockNode {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockNode {
    pub async fn start(tick: u64) -> Self {
        let (commands, _) = broadcast::channel(64);
        let state = Arc::new(MockState {
            tick: AtomicU64::new(tick),
            healthy: AtomicBool::new(true),
            hold_subscribes: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
            subscribes: Mutex::new(Vec::new()),
            unsubscribes: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            commands,
        });

        let app = Router::new()
            .route("/qubic", post(status))
            .route("/ws/qubic", get(upgrade))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_tick(&self, tick: u64) {
        self.state.tick.store(tick, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn hold_subscribes(&self, hold: bool) {
        self.state.hold_subscribes.store(hold, Ordering::SeqCst);
    }

    pub fn push(&self, subscription: &str, result: Value) {
        let _ = self.state.commands.send(Command::Push {
            subscription: subscription.to_string(),
            result,
        });
    }

    /// Abruptly drop every open socket.
    pub fn drop_connections(&self) {
        let _ = self.state.commands.send(Command::Drop);
    }

    pub fn subscribes(&self) -> Vec<Value> {
        self.state.subscribes.lock().unwrap().clone()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.state.unsubscribes.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }
}

async fn status(State(state): State<Arc<MockState>>) -> Response {
    if !state.healthy.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "epoch": 150,
            "currentTick": state.tick.load(Ordering::SeqCst),
            "initialTick": 0,
            "syncing": false,
        }
    }))
    .into_response()
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<MockState>>) -> Response {
    let commands = state.commands.subscribe();
    ws.on_upgrade(move |socket| serve_socket(socket, state, commands))
}

async fn serve_socket(
    socket: WebSocket,
    state: Arc<MockState>,
    mut commands: broadcast::Receiver<Command>,
) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let (mut tx, mut rx) = socket.split();

    loop {
        tokio::select! {
            frame = rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if let Some(reply) = answer(&state, &request) {
                    if tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                        break;
                    }
                }
            }
            command = commands.recv() => match command {
                Ok(Command::Push { subscription, result }) => {
                    let frame = json!({
                        "jsonrpc": "2.0",
                        "method": "qubic_subscription",
                        "params": { "subscription": subscription, "result": result },
                    });
                    if tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Drop) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

fn answer(state: &MockState, request: &Value) -> Option<Value> {
    let id = request.get("id")?.clone();
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    let result = match method {
        "qubic_subscribe" => {
            let n = state.next_subscription.fetch_add(1, Ordering::SeqCst);
            state
                .subscribes
                .lock()
                .unwrap()
                .push(params.get(1).cloned().unwrap_or(Value::Null));
            if state.hold_subscribes.load(Ordering::SeqCst) {
                return None;
            }
            json!(format!("sub-{}", n))
        }
        "qubic_unsubscribe" => {
            let server_id = params.get(0).and_then(Value::as_str).unwrap_or_default();
            state.unsubscribes.lock().unwrap().push(server_id.to_string());
            json!(true)
        }
        "qubic_chainId" => json!(CHAIN_ID),
        "qubic_clientVersion" => json!("bob-mock/1.0"),
        "qubic_syncing" => json!({
            "epoch": 150,
            "currentTick": state.tick.load(Ordering::SeqCst),
            "initialTick": 0,
            "syncing": false,
        }),
        // Never answered; lets tests hold a request in flight.
        "qubic_slow" => return None,
        "qubic_fail" => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32000, "message": "boom" },
            }))
        }
        _ => {
            return Some(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "method not found" },
            }))
        }
    };

    Some(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
}

/// Client settings with short delays for tests.
pub fn test_config(nodes: Vec<String>) -> ClientConfig {
    let mut config = ClientConfig::with_nodes(nodes);
    config.initial_reconnect_delay_ms = 50;
    config.max_reconnect_delay_ms = 200;
    config.health_check_interval_ms = 60_000;
    config.probe_timeout_ms = 1_000;
    config.connect_timeout_ms = 2_000;
    config
}

/// Base URL of a loopback port nothing listens on.
pub fn dead_node() -> String {
    "http://127.0.0.1:1".to_string()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Await `fut`, failing the test if it takes longer than `timeout`.
pub async fn within<T>(timeout: Duration, fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, fut)
        .await
        .expect("operation did not finish in time")
}
