//! Multi-node failover client.
//!
//! # Data Flow
//! ```text
//! BobClientBuilder::connect
//!     → probe all nodes → rank available → connect best (next on failure)
//!     → spawn connection driver (receive loop, reconnect on loss)
//!     → spawn health loop (periodic probes, switch requests)
//!
//! request()        → multiplexer → socket → receive loop resolves
//! subscribe_*()    → registry entry + qubic_subscribe → typed handle
//! shutdown()       → master token → every loop, request and handle ends
//! ```
//!
//! # Design Decisions
//! - Only the initial connect surfaces "no node reachable"; later outages
//!   are handled by reconnection and show up as events
//! - Background tasks hold the client's parts, never the client itself;
//!   dropping the last client handle shuts everything down

pub(crate) mod driver;
pub mod error;
pub mod queries;

use serde_json::{json, Value};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{validate_config, ClientConfig, ConfigError};
use crate::events::{ConnectionEvent, EventSink};
use crate::health::{HealthProber, HttpStatusProbe, NodeHealthState, StatusProbe};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionManager, ConnectionState};
use crate::node::selector::rank_available;
use crate::node::{NodeEndpoint, NodePool};
use crate::resilience::ReconnectOrchestrator;
use crate::rpc::{methods, RequestMultiplexer};
use crate::subscription::{
    LogStreamItem, NewTick, Notification, Subscription, SubscriptionKind, SubscriptionRegistry,
    TickEvent,
};
use driver::{health_loop, ConnectionDriver};
use error::{BobError, BobResult, CancelReason};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const SWITCH_QUEUE: usize = 1;

/// Configures and connects a [`BobClient`].
pub struct BobClientBuilder {
    config: ClientConfig,
    events: EventSink,
    probe: Option<Arc<dyn StatusProbe>>,
}

impl BobClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            events: EventSink::new(),
            probe: None,
        }
    }

    /// Observe connection events from the first connect attempt on.
    pub fn on_event<F>(self, observer: F) -> Self
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.events.add_observer(observer);
        self
    }

    /// Replace the HTTP status probe.
    pub fn status_probe(mut self, probe: Arc<dyn StatusProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Probe every node, connect to the best reachable one and start the
    /// background tasks. Fails only if no node accepts a connection.
    pub async fn connect(self) -> BobResult<BobClient> {
        let config = self.config;
        if config.nodes.is_empty() {
            return Err(BobError::NoNodes);
        }
        validate_config(&config).map_err(|errors| BobError::Config(ConfigError::Validation(errors)))?;

        let events = self.events;
        let pool = Arc::new(NodePool::new(&config)?);
        let probe = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HttpStatusProbe::new(config.probe_timeout())?),
        };
        let prober = Arc::new(HealthProber::new(
            pool.clone(),
            probe,
            events.clone(),
            config.failure_threshold,
        ));

        let shutdown = Shutdown::new();
        let connection = Arc::new(ConnectionManager::new(
            events.clone(),
            config.connect_timeout(),
            shutdown.token(),
        ));
        let mux = RequestMultiplexer::new(connection.clone(), config.request_timeout());
        let registry = SubscriptionRegistry::new();

        prober.probe_all().await;
        let snapshot = pool.snapshot();
        let candidates: Vec<Arc<NodeEndpoint>> = rank_available(&snapshot)
            .into_iter()
            .filter_map(|state| pool.endpoint(state.node))
            .collect();

        let mut reader = None;
        for node in &candidates {
            match connection.connect(node).await {
                Ok(r) => {
                    reader = Some(r);
                    break;
                }
                Err(e) => {
                    events.emit(ConnectionEvent::Error {
                        message: format!("connect to {} failed: {}", node.label(), e),
                    });
                }
            }
        }
        let Some(reader) = reader else {
            tracing::error!(nodes = pool.len(), available = candidates.len(), "No node reachable");
            shutdown.trigger();
            return Err(BobError::NoNodeAvailable);
        };

        let orchestrator = Arc::new(ReconnectOrchestrator::new(
            connection.clone(),
            prober.clone(),
            mux.clone(),
            registry.clone(),
            events.clone(),
            config.initial_reconnect_delay(),
            config.max_reconnect_delay(),
            shutdown.token(),
        ));

        let (switch_tx, switch_rx) = mpsc::channel(SWITCH_QUEUE);
        let driver = ConnectionDriver {
            orchestrator,
            connection: connection.clone(),
            prober: prober.clone(),
            mux: mux.clone(),
            registry: registry.clone(),
            events: events.clone(),
            shutdown: shutdown.token(),
        };
        let tasks = vec![
            tokio::spawn(driver.run(reader, switch_rx)),
            tokio::spawn(health_loop(
                prober.clone(),
                connection.clone(),
                switch_tx,
                config.health_check_interval(),
                config.switch_threshold_ticks,
                shutdown.token(),
            )),
        ];

        Ok(BobClient {
            inner: Arc::new(ClientInner {
                config,
                pool,
                prober,
                connection,
                mux,
                registry,
                events,
                shutdown,
                tasks: Mutex::new(tasks),
            }),
        })
    }
}

/// Undoes a registration unless `subscribe` hands out the handle, including
/// when its future is dropped mid-flight.
struct Registration<'a> {
    registry: &'a SubscriptionRegistry,
    mux: &'a RequestMultiplexer,
    id: Uuid,
    armed: bool,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(entry) = self.registry.remove(self.id) else {
            return;
        };
        // The server may already have answered; release its subscription.
        let (Some(server_id), Ok(runtime)) = (entry.server_id(), tokio::runtime::Handle::try_current()) else {
            return;
        };
        let mux = self.mux.clone();
        runtime.spawn(async move {
            if let Err(e) = mux.send(methods::UNSUBSCRIBE, json!([server_id])).await {
                tracing::debug!(error = %e, "Unsubscribe of abandoned subscription failed");
            }
        });
    }
}

/// Handle to a running client. Cheap to clone.
#[derive(Clone)]
pub struct BobClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    pool: Arc<NodePool>,
    prober: Arc<HealthProber>,
    connection: Arc<ConnectionManager>,
    mux: RequestMultiplexer,
    registry: SubscriptionRegistry,
    events: EventSink,
    shutdown: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if self.shutdown.trigger() {
            self.mux.cancel_all(CancelReason::Shutdown);
            self.registry.cancel_all();
        }
    }
}

impl BobClient {
    pub fn builder(config: ClientConfig) -> BobClientBuilder {
        BobClientBuilder::new(config)
    }

    /// Connect with default settings.
    pub async fn connect(config: ClientConfig) -> BobResult<Self> {
        BobClientBuilder::new(config).connect().await
    }

    /// Send a JSON-RPC request on the active socket.
    pub async fn request(&self, method: &str, params: Value) -> BobResult<Value> {
        self.ensure_running()?;
        self.inner.mux.send(method, params).await
    }

    /// Like [`request`](Self::request), abandoned early if `cancel` fires.
    /// The request deadline still applies.
    pub async fn request_with_cancel(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> BobResult<Value> {
        self.ensure_running()?;
        self.inner.mux.send_with(method, params, None, Some(cancel)).await
    }

    /// Stream of every tick, resuming after the last delivered tick.
    pub async fn subscribe_tick_stream(&self, params: Value) -> BobResult<Subscription<TickEvent>> {
        self.subscribe(SubscriptionKind::TickStream, params).await
    }

    /// Stream of newly produced ticks; restarts from live on reconnect.
    pub async fn subscribe_new_ticks(&self, params: Value) -> BobResult<Subscription<NewTick>> {
        self.subscribe(SubscriptionKind::NewTicks, params).await
    }

    /// Transfers, resuming after the last delivered `(logId, epoch)`.
    pub async fn subscribe_transfers(&self, params: Value) -> BobResult<Subscription<LogStreamItem>> {
        self.subscribe(SubscriptionKind::Transfers, params).await
    }

    /// Contract logs, resuming after the last delivered `(logId, epoch)`.
    pub async fn subscribe_logs(&self, params: Value) -> BobResult<Subscription<LogStreamItem>> {
        self.subscribe(SubscriptionKind::Logs, params).await
    }

    /// Subscribe with a caller-chosen item type.
    pub async fn subscribe<T: Notification>(
        &self,
        kind: SubscriptionKind,
        params: Value,
    ) -> BobResult<Subscription<T>> {
        self.ensure_running()?;
        let registry = &self.inner.registry;
        let (entry, handle) = registry.register::<T>(
            kind,
            params,
            self.inner.config.subscription_buffer_size,
            self.inner.shutdown.child(),
        );

        let mut registration = Registration {
            registry,
            mux: &self.inner.mux,
            id: entry.id(),
            armed: true,
        };

        let result = self
            .inner
            .mux
            .send_with(
                methods::SUBSCRIBE,
                json!([kind.as_str(), entry.resume_params()]),
                Some(registry.bind_on_result(entry.id())),
                None,
            )
            .await;

        match result {
            Ok(Value::String(server_id)) => {
                registration.armed = false;
                tracing::info!(subscription = %entry.id(), kind = %kind, server_id = %server_id, "Subscribed");
                Ok(handle)
            }
            Ok(other) => Err(BobError::UnexpectedResponse(format!(
                "subscribe returned {} instead of an id",
                other
            ))),
            Err(e) => Err(e),
        }
    }

    /// End a subscription: best-effort server unsubscribe, then the handle
    /// yields `None`.
    pub async fn unsubscribe<T>(&self, subscription: &Subscription<T>) {
        self.unsubscribe_id(subscription.id()).await
    }

    pub async fn unsubscribe_id(&self, id: Uuid) {
        let Some(entry) = self.inner.registry.remove(id) else {
            return;
        };
        let kind = entry.kind();
        let server_id = entry.server_id();
        // The entry owns the delivery sender; release it before the round trip.
        drop(entry);

        if let Some(server_id) = server_id {
            if let Err(e) = self.request(methods::UNSUBSCRIBE, json!([server_id])).await {
                tracing::debug!(subscription = %id, error = %e, "Unsubscribe request failed");
            }
        }
        tracing::info!(subscription = %id, kind = %kind, "Unsubscribed");
    }

    /// Stop every background task, cancel pending requests and
    /// subscriptions, and close the socket. Idempotent.
    pub async fn shutdown(&self) {
        if !self.inner.shutdown.trigger() {
            return;
        }
        tracing::info!("Shutting down client");

        self.inner.mux.cancel_all(CancelReason::Shutdown);
        self.inner.registry.cancel_all();
        self.inner.connection.close().await;

        let tasks: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let joined = tokio::time::timeout(SHUTDOWN_GRACE, futures_util::future::join_all(tasks)).await;
        if joined.is_err() {
            tracing::warn!(grace_ms = SHUTDOWN_GRACE.as_millis() as u64, "Background tasks did not stop in time");
        }
        tracing::info!("Client shut down");
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Watch connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch_state()
    }

    pub fn active_node(&self) -> Option<Arc<NodeEndpoint>> {
        self.inner.connection.active_node()
    }

    /// Health records of every configured node.
    pub fn nodes(&self) -> Vec<NodeHealthState> {
        self.inner.pool.snapshot()
    }

    /// Run one probe round now instead of waiting for the interval.
    pub async fn probe_now(&self) {
        self.inner.prober.probe_all().await
    }

    pub fn events(&self) -> &EventSink {
        &self.inner.events
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.mux.pending_count()
    }

    fn ensure_running(&self) -> BobResult<()> {
        if self.inner.shutdown.is_triggered() {
            return Err(BobError::Shutdown);
        }
        Ok(())
    }
}

impl std::fmt::Debug for BobClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BobClient")
            .field("state", &self.state())
            .field("active", &self.active_node().map(|n| n.label().to_string()))
            .field("subscriptions", &self.inner.registry.len())
            .field("pending", &self.inner.mux.pending_count())
            .finish()
    }
}
