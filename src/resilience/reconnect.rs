//! Recovery after the active socket is lost.
//!
//! # Responsibilities
//! - Invalidate everything tied to the lost socket
//! - Loop backoff → re-probe → reselect → connect until a node accepts
//! - Restore every live subscription on the new socket
//!
//! # Design Decisions
//! - No cap on attempts; only the delay is capped. The loop ends on
//!   success or shutdown
//! - A planned switch tries its target immediately and falls back to the
//!   regular loop if that connect fails

use futures_util::future::join_all;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::client::error::{BobError, CancelReason};
use crate::events::{ConnectionEvent, EventSink};
use crate::health::HealthProber;
use crate::net::{ConnectionManager, WsReader};
use crate::node::{select_best, NodeEndpoint};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::rpc::{methods, RequestMultiplexer};
use crate::subscription::{SubscriptionEntry, SubscriptionRegistry};

/// Drives reconnection and resubscription.
pub struct ReconnectOrchestrator {
    connection: Arc<ConnectionManager>,
    prober: Arc<HealthProber>,
    mux: RequestMultiplexer,
    registry: SubscriptionRegistry,
    events: EventSink,
    initial_delay: Duration,
    max_delay: Duration,
    shutdown: CancellationToken,
}

impl ReconnectOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection: Arc<ConnectionManager>,
        prober: Arc<HealthProber>,
        mux: RequestMultiplexer,
        registry: SubscriptionRegistry,
        events: EventSink,
        initial_delay: Duration,
        max_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connection,
            prober,
            mux,
            registry,
            events,
            initial_delay,
            max_delay,
            shutdown,
        }
    }

    /// Enter `Reconnecting`, forget server subscription ids, cancel every
    /// pending request, then release the old writer.
    pub async fn begin(&self) {
        self.connection.mark_reconnecting();
        self.registry.mark_all_disconnected();
        self.mux.cancel_all(CancelReason::Disconnected);
        self.connection.release_writer().await;
    }

    /// Reconnect, trying `preferred` first without delay. Returns the new
    /// read half, or `None` if shut down first.
    pub async fn reconnect(&self, preferred: Option<Arc<NodeEndpoint>>) -> Option<WsReader> {
        let previous = self.connection.active_node();

        if let Some(target) = preferred {
            match self.connection.connect(&target).await {
                Ok(reader) => {
                    self.announce_switch(previous.as_deref(), &target);
                    return Some(reader);
                }
                Err(BobError::Shutdown) => return None,
                Err(e) => self.report_failure(&target, &e),
            }
        }

        loop {
            let attempt = self.connection.next_attempt();
            let delay = calculate_backoff(attempt, self.initial_delay, self.max_delay);
            metrics::record_reconnect_attempt();
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = self.prober.probe_all() => {}
            }

            let pool = self.prober.pool();
            let snapshot = pool.snapshot();
            let Some(endpoint) = select_best(&snapshot).and_then(|best| pool.endpoint(best.node))
            else {
                tracing::warn!(attempt, "No node available; retrying");
                continue;
            };

            match self.connection.connect(&endpoint).await {
                Ok(reader) => {
                    self.announce_switch(previous.as_deref(), &endpoint);
                    return Some(reader);
                }
                Err(BobError::Shutdown) => return None,
                Err(e) => self.report_failure(&endpoint, &e),
            }
        }
    }

    /// Resubscribe every live handle on the current socket. Must run while
    /// the receive loop for that socket is active.
    pub async fn resubscribe_all(&self) {
        let entries = self.registry.take_for_restore();
        if entries.is_empty() {
            return;
        }
        tracing::info!(count = entries.len(), "Restoring subscriptions");
        join_all(entries.into_iter().map(|entry| self.resubscribe(entry))).await;
    }

    async fn resubscribe(&self, entry: Arc<SubscriptionEntry>) {
        if entry.is_cancelled() {
            self.registry.remove(entry.id());
            return;
        }

        let params = json!([entry.kind().as_str(), entry.resume_params()]);
        let hook = self.registry.bind_on_result(entry.id());
        let result = self
            .mux
            .send_with(methods::SUBSCRIBE, params, Some(hook), Some(self.shutdown.clone()))
            .await;

        match result {
            Ok(server_id) => {
                let subscription_id = server_id.as_str().unwrap_or_default().to_string();
                if !self.registry.contains(entry.id()) {
                    // Unsubscribed while the request was in flight.
                    self.release_orphan(&entry, subscription_id).await;
                    return;
                }
                tracing::info!(
                    subscription = %entry.id(),
                    kind = %entry.kind(),
                    server_id = %subscription_id,
                    "Subscription restored"
                );
                self.events.emit(ConnectionEvent::SubscriptionRestored {
                    kind: entry.kind(),
                    subscription_id,
                });
            }
            Err(e) if e.is_cancellation() => {
                tracing::debug!(subscription = %entry.id(), error = %e, "Resubscribe abandoned");
            }
            Err(e) => {
                tracing::error!(subscription = %entry.id(), kind = %entry.kind(), error = %e, "Resubscribe failed");
                self.events.emit(ConnectionEvent::Error {
                    message: format!("resubscribe {} failed: {}", entry.kind(), e),
                });
            }
        }
    }

    async fn release_orphan(&self, entry: &SubscriptionEntry, server_id: String) {
        tracing::debug!(subscription = %entry.id(), server_id = %server_id, "Releasing orphaned server subscription");
        let result = self
            .mux
            .send_with(methods::UNSUBSCRIBE, json!([server_id]), None, Some(self.shutdown.clone()))
            .await;
        if let Err(e) = result {
            tracing::debug!(subscription = %entry.id(), error = %e, "Orphan unsubscribe failed");
        }
    }

    fn announce_switch(&self, previous: Option<&NodeEndpoint>, current: &NodeEndpoint) {
        if previous.map(|p| p.id) == Some(current.id) {
            return;
        }
        let from = previous.map(|p| p.label().to_string());
        tracing::info!(from = ?from, to = %current.label(), "Switched node");
        self.events.emit(ConnectionEvent::NodeSwitched {
            from,
            to: current.label().to_string(),
        });
    }

    fn report_failure(&self, node: &NodeEndpoint, error: &BobError) {
        self.events.emit(ConnectionEvent::Error {
            message: format!("connect to {} failed: {}", node.label(), error),
        });
    }
}

impl std::fmt::Debug for ReconnectOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectOrchestrator")
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}
