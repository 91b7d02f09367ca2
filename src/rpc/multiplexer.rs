//! Request/response multiplexing over a single socket.
//!
//! # Responsibilities
//! - Allocate request ids (monotonic for the life of the client)
//! - Track one completion handle per in-flight request
//! - Resolve, reject or cancel handles from the receive loop
//!
//! # Design Decisions
//! - Pending map is a `DashMap`: insert/remove are atomic per id, unrelated
//!   requests never serialize on a global lock
//! - Every request terminates exactly once: whoever removes the entry from
//!   the map owns the outcome
//! - The request deadline always applies, independently of any caller
//!   cancellation token, and covers the socket write
//! - A caller that drops its request future leaves nothing in the map

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::client::error::{BobError, BobResult, CancelReason};
use crate::observability::metrics;
use crate::rpc::types::{RpcErrorObject, RpcRequest};

/// Outbound half of the active socket.
pub trait FrameSink: Send + Sync {
    /// Write one text frame.
    fn send_text(&self, text: String) -> BoxFuture<'_, BobResult<()>>;
}

/// Runs inside the receive loop on a successful response, before the caller
/// is woken.
pub type ResponseHook = Box<dyn FnOnce(&Value) + Send + Sync>;

struct PendingRequest {
    method: String,
    tx: oneshot::Sender<BobResult<Value>>,
    on_result: Option<ResponseHook>,
}

/// Correlates outbound requests with inbound responses.
#[derive(Clone)]
pub struct RequestMultiplexer {
    inner: Arc<MuxInner>,
}

struct MuxInner {
    next_id: AtomicU64,
    pending: DashMap<u64, PendingRequest>,
    sink: Arc<dyn FrameSink>,
    timeout: Duration,
}

impl RequestMultiplexer {
    pub fn new(sink: Arc<dyn FrameSink>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                next_id: AtomicU64::new(1),
                pending: DashMap::new(),
                sink,
                timeout,
            }),
        }
    }

    /// Send a request and wait for its outcome.
    pub async fn send(&self, method: &str, params: Value) -> BobResult<Value> {
        self.send_with(method, params, None, None).await
    }

    /// Send a request; `cancel` abandons the wait early.
    pub async fn send_with(
        &self,
        method: &str,
        params: Value,
        on_result: Option<ResponseHook>,
        cancel: Option<CancellationToken>,
    ) -> BobResult<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&RpcRequest::new(id, method, &params))?;

        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                tx,
                on_result,
            },
        );

        let _entry = PendingGuard {
            pending: &self.inner.pending,
            id,
        };

        let start = Instant::now();
        let exchange = async {
            if let Err(e) = self.inner.sink.send_text(text).await {
                tracing::debug!(id, method, error = %e, "Request write failed");
                return Err(match e {
                    BobError::Shutdown => BobError::Cancelled(CancelReason::Shutdown),
                    _ => BobError::Cancelled(CancelReason::Disconnected),
                });
            }
            tracing::trace!(id, method, "Request sent");
            // Sender dropped without an answer: the map was torn down.
            rx.await
                .unwrap_or(Err(BobError::Cancelled(CancelReason::Shutdown)))
        };

        let cancelled = async {
            match &cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        // The deadline covers the write as well as the wait for the answer.
        let outcome = tokio::select! {
            res = tokio::time::timeout(self.inner.timeout, exchange) => match res {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(id, method, timeout_ms = self.timeout_ms(), "Request timed out");
                    Err(BobError::Timeout(self.timeout_ms()))
                }
            },
            _ = cancelled => Err(BobError::Cancelled(CancelReason::Requested)),
        };

        let label = match &outcome {
            Ok(_) => "success",
            Err(BobError::Rpc { .. }) => "error",
            Err(BobError::Timeout(_)) => "timeout",
            Err(_) => "cancelled",
        };
        metrics::record_request(method, label, start.elapsed());

        outcome
    }

    /// Complete the request `id`. Returns false for unknown ids.
    pub fn resolve(&self, id: u64, outcome: Result<Value, RpcErrorObject>) -> bool {
        let Some((_, pending)) = self.inner.pending.remove(&id) else {
            tracing::debug!(id, "Response for unknown request id dropped");
            metrics::record_dropped_frame("unknown_request");
            return false;
        };

        let outcome = match outcome {
            Ok(value) => {
                if let Some(hook) = pending.on_result {
                    hook(&value);
                }
                Ok(value)
            }
            Err(error) => {
                tracing::debug!(id, method = %pending.method, code = error.code, "Server returned error");
                Err(error.into())
            }
        };

        // The caller may have given up between removal and here.
        let _ = pending.tx.send(outcome);
        true
    }

    /// Fail every in-flight request. Returns how many were cancelled.
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let ids: Vec<u64> = self.inner.pending.iter().map(|entry| *entry.key()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, pending)) = self.inner.pending.remove(&id) {
                let _ = pending.tx.send(Err(BobError::Cancelled(reason)));
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tracing::info!(count = cancelled, reason = %reason, "Cancelled pending requests");
        }
        cancelled
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    fn timeout_ms(&self) -> u64 {
        self.inner.timeout.as_millis() as u64
    }
}

/// Removes a request's entry when `send_with` returns or its future is
/// dropped; a no-op once the entry has been resolved or cancelled.
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, PendingRequest>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl std::fmt::Debug for RequestMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMultiplexer")
            .field("pending", &self.inner.pending.len())
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Captures written frames; can be switched into a failing mode.
    pub(crate) struct ChannelSink {
        pub tx: mpsc::UnboundedSender<Value>,
        pub fail: Mutex<bool>,
    }

    impl FrameSink for ChannelSink {
        fn send_text(&self, text: String) -> BoxFuture<'_, BobResult<()>> {
            Box::pin(async move {
                if *self.fail.lock().unwrap() {
                    return Err(BobError::NotConnected);
                }
                let value: Value = serde_json::from_str(&text)?;
                self.tx.send(value).map_err(|_| BobError::NotConnected)
            })
        }
    }

    pub(crate) fn mux(timeout: Duration) -> (RequestMultiplexer, Arc<ChannelSink>, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(ChannelSink {
            tx,
            fail: Mutex::new(false),
        });
        (RequestMultiplexer::new(sink.clone(), timeout), sink, rx)
    }

    #[tokio::test]
    async fn test_resolve_success() {
        let (mux, _sink, mut frames) = mux(Duration::from_secs(30));
        let m = mux.clone();
        let call = tokio::spawn(async move { m.send("qubic_chainId", json!([])).await });

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame["method"], "qubic_chainId");
        let id = frame["id"].as_u64().unwrap();

        assert!(mux.resolve(id, Ok(json!(2025))));
        assert_eq!(call.await.unwrap().unwrap(), json!(2025));
        assert_eq!(mux.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (mux, _sink, mut frames) = mux(Duration::from_secs(30));
        for _ in 0..3 {
            let m = mux.clone();
            tokio::spawn(async move { m.send("x", Value::Null).await });
        }
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(frames.recv().await.unwrap()["id"].as_u64().unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert_eq!(mux.cancel_all(CancelReason::Shutdown), 3);
    }

    #[tokio::test]
    async fn test_server_error() {
        let (mux, _sink, mut frames) = mux(Duration::from_secs(30));
        let m = mux.clone();
        let call = tokio::spawn(async move { m.send("qubic_getBalance", json!(["bad"])).await });
        let id = frames.recv().await.unwrap()["id"].as_u64().unwrap();

        mux.resolve(
            id,
            Err(RpcErrorObject {
                code: -32602,
                message: "invalid identity".to_string(),
            }),
        );
        match call.await.unwrap() {
            Err(BobError::Rpc { code, message }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "invalid identity");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_removes_entry() {
        let (mux, _sink, mut frames) = mux(Duration::from_millis(50));
        let result = mux.send("qubic_slow", Value::Null).await;
        assert!(matches!(result, Err(BobError::Timeout(50))));
        assert_eq!(mux.pending_count(), 0);

        // A late answer is dropped silently.
        let id = frames.recv().await.unwrap()["id"].as_u64().unwrap();
        assert!(!mux.resolve(id, Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_cancel_all_beats_timeout() {
        let (mux, _sink, mut frames) = mux(Duration::from_secs(30));
        let m = mux.clone();
        let call = tokio::spawn(async move { m.send("x", Value::Null).await });
        frames.recv().await.unwrap();

        let started = Instant::now();
        assert_eq!(mux.cancel_all(CancelReason::Disconnected), 1);
        let result = call.await.unwrap();
        assert!(matches!(result, Err(BobError::Cancelled(CancelReason::Disconnected))));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_write_failure_is_cancellation() {
        let (mux, sink, _frames) = mux(Duration::from_secs(30));
        *sink.fail.lock().unwrap() = true;
        let result = mux.send("x", Value::Null).await;
        assert!(matches!(result, Err(BobError::Cancelled(CancelReason::Disconnected))));
        assert_eq!(mux.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_caller_leaves_no_entry() {
        let (mux, _sink, mut frames) = mux(Duration::from_secs(30));
        let m = mux.clone();
        let call = tokio::spawn(async move { m.send("qubic_slow", Value::Null).await });
        let id = frames.recv().await.unwrap()["id"].as_u64().unwrap();
        assert_eq!(mux.pending_count(), 1);

        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert_eq!(mux.pending_count(), 0);
        assert!(!mux.resolve(id, Ok(Value::Null)));

        // Same through an outer timeout.
        let outer = tokio::time::timeout(Duration::from_millis(20), mux.send("qubic_slow", Value::Null)).await;
        assert!(outer.is_err());
        assert_eq!(mux.pending_count(), 0);
    }

    /// A socket whose writes never complete.
    struct StalledSink;

    impl FrameSink for StalledSink {
        fn send_text(&self, _text: String) -> BoxFuture<'_, BobResult<()>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn test_stalled_write_hits_deadline() {
        let mux = RequestMultiplexer::new(Arc::new(StalledSink), Duration::from_millis(50));
        let started = Instant::now();
        let result = mux.send("qubic_chainId", Value::Null).await;
        assert!(matches!(result, Err(BobError::Timeout(50))));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(mux.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_hook_runs_before_caller_wakes() {
        let (mux, _sink, mut frames) = mux(Duration::from_secs(30));
        let seen = Arc::new(Mutex::new(None));
        let seen_hook = seen.clone();
        let hook: ResponseHook = Box::new(move |value: &Value| {
            *seen_hook.lock().unwrap() = value.as_str().map(str::to_string);
        });

        let m = mux.clone();
        let call = tokio::spawn(async move {
            m.send_with("qubic_subscribe", json!(["tickStream", {}]), Some(hook), None)
                .await
        });
        let id = frames.recv().await.unwrap()["id"].as_u64().unwrap();
        mux.resolve(id, Ok(json!("sub-1")));

        assert_eq!(seen.lock().unwrap().as_deref(), Some("sub-1"));
        assert_eq!(call.await.unwrap().unwrap(), json!("sub-1"));
    }

    #[tokio::test]
    async fn test_caller_token_cancels_wait() {
        let (mux, _sink, _frames) = mux(Duration::from_secs(30));
        let token = CancellationToken::new();
        let m = mux.clone();
        let t = token.clone();
        let call = tokio::spawn(async move { m.send_with("x", Value::Null, None, Some(t)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        assert!(matches!(call.await.unwrap(), Err(BobError::Cancelled(_))));
        assert_eq!(mux.pending_count(), 0);
    }
}
