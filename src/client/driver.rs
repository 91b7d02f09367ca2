//! Background tasks owned by a connected client.
//!
//! # Responsibilities
//! - Receive loop: read frames, resolve requests, dispatch notifications
//! - Connection driver: notice socket loss or a switch request and run the
//!   reconnect orchestrator
//! - Health loop: periodic probe rounds and switch evaluation

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::events::{ConnectionEvent, EventSink};
use crate::health::HealthProber;
use crate::net::{ConnectionManager, ConnectionState, WsReader};
use crate::node::{select_best, should_switch, NodeId};
use crate::observability::metrics;
use crate::resilience::ReconnectOrchestrator;
use crate::rpc::types::{parse_frame, Incoming};
use crate::rpc::RequestMultiplexer;
use crate::subscription::{DispatchStatus, SubscriptionRegistry};

/// Read frames until the socket is no longer open. Returns why it ended.
pub(crate) async fn receive_loop(
    mut reader: WsReader,
    mux: RequestMultiplexer,
    registry: SubscriptionRegistry,
) -> String {
    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_text(text.as_str(), &mux, &registry).await,
            Ok(Message::Binary(_)) => {
                tracing::debug!("Binary frame ignored");
                metrics::record_dropped_frame("binary");
            }
            Ok(Message::Close(frame)) => {
                return match frame {
                    Some(frame) => format!("closed by node: {} {}", u16::from(frame.code), frame.reason.as_str()),
                    None => "closed by node".to_string(),
                };
            }
            Ok(_) => {}
            Err(e) => return e.to_string(),
        }
    }
    "stream ended".to_string()
}

async fn handle_text(text: &str, mux: &RequestMultiplexer, registry: &SubscriptionRegistry) {
    match parse_frame(text) {
        Ok(Incoming::Response { id, outcome }) => {
            mux.resolve(id, outcome);
        }
        Ok(Incoming::Notification(params)) => {
            match registry.dispatch(&params.subscription, params.result).await {
                Some(DispatchStatus::Delivered) => {}
                Some(DispatchStatus::Malformed) => metrics::record_dropped_frame("malformed_payload"),
                Some(DispatchStatus::Closed) => metrics::record_dropped_frame("closed_subscription"),
                None => {
                    tracing::debug!(server_id = %params.subscription, "Notification for unknown subscription dropped");
                    metrics::record_dropped_frame("unknown_subscription");
                }
            }
        }
        Ok(Incoming::Other) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Malformed frame discarded");
            metrics::record_dropped_frame("malformed");
        }
    }
}

/// Owns the receive loop of the current socket and replaces the socket when
/// it is lost or a better node is requested.
pub(crate) struct ConnectionDriver {
    pub orchestrator: Arc<ReconnectOrchestrator>,
    pub connection: Arc<ConnectionManager>,
    pub prober: Arc<HealthProber>,
    pub mux: RequestMultiplexer,
    pub registry: SubscriptionRegistry,
    pub events: EventSink,
    pub shutdown: CancellationToken,
}

impl ConnectionDriver {
    pub(crate) async fn run(self, mut reader: WsReader, mut switch_rx: mpsc::Receiver<NodeId>) {
        let mut restore = false;

        loop {
            let mut receiver = tokio::spawn(receive_loop(reader, self.mux.clone(), self.registry.clone()));
            if restore {
                let orchestrator = self.orchestrator.clone();
                tokio::spawn(async move { orchestrator.resubscribe_all().await });
            }

            let node = self.connection.active_node().map(|n| n.label().to_string());
            let preferred = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    receiver.abort();
                    return;
                }
                ended = &mut receiver => {
                    if self.shutdown.is_cancelled() {
                        return;
                    }
                    let reason = ended.unwrap_or_else(|e| format!("receive loop failed: {}", e));
                    tracing::warn!(node = ?node, reason = %reason, "Connection lost");
                    self.events.emit(ConnectionEvent::Disconnected { node, reason });
                    None
                }
                Some(target) = switch_rx.recv() => {
                    receiver.abort();
                    tracing::info!(from = ?node, to = %target, "Switching node");
                    self.events.emit(ConnectionEvent::Disconnected {
                        node,
                        reason: "switching node".to_string(),
                    });
                    self.prober.pool().endpoint(target)
                }
            };

            self.orchestrator.begin().await;
            match self.orchestrator.reconnect(preferred).await {
                Some(next) => {
                    reader = next;
                    restore = true;
                    // Switch requests queued before the reconnect are stale.
                    while switch_rx.try_recv().is_ok() {}
                }
                None => return,
            }
        }
    }
}

/// Probe on a fixed interval and request a switch when the active node
/// falls behind or becomes unavailable.
pub(crate) async fn health_loop(
    prober: Arc<HealthProber>,
    connection: Arc<ConnectionManager>,
    switch_tx: mpsc::Sender<NodeId>,
    period: Duration,
    switch_threshold_ticks: u64,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = prober.probe_all() => {}
        }

        if connection.state() != ConnectionState::Connected {
            continue;
        }
        let Some(active) = connection.active_node() else {
            continue;
        };

        let snapshot = prober.pool().snapshot();
        let Some(best) = select_best(&snapshot) else {
            continue;
        };
        let Some(current) = snapshot.iter().find(|s| s.node == active.id) else {
            continue;
        };

        if should_switch(current, best, switch_threshold_ticks) {
            tracing::info!(
                active = %current.base_url,
                active_cursor = current.last_observed_cursor,
                best = %best.base_url,
                best_cursor = best.last_observed_cursor,
                "Better node available"
            );
            if switch_tx.try_send(best.node).is_err() {
                tracing::debug!("Switch already pending");
            }
        }
    }
}
