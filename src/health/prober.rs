//! Active health probing.
//!
//! # Responsibilities
//! - Probe every configured node concurrently
//! - Update node health records from the results
//! - Announce availability flips as connection events

use futures_util::future::{join_all, BoxFuture};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::error::{BobError, BobResult};
use crate::events::{ConnectionEvent, EventSink};
use crate::health::state::HealthTransition;
use crate::node::{NodeEndpoint, NodePool};
use crate::observability::metrics;
use crate::rpc::methods;
use crate::rpc::types::{HttpResponse, SyncStatus, JSONRPC_VERSION};

/// Source of a node's sync status.
pub trait StatusProbe: Send + Sync {
    fn probe<'a>(&'a self, node: &'a NodeEndpoint) -> BoxFuture<'a, BobResult<SyncStatus>>;
}

/// Status probe over the node's HTTP JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpStatusProbe {
    client: reqwest::Client,
}

impl HttpStatusProbe {
    pub fn new(timeout: Duration) -> BobResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("bob-client-health-check")
            .build()?;
        Ok(Self { client })
    }
}

impl StatusProbe for HttpStatusProbe {
    fn probe<'a>(&'a self, node: &'a NodeEndpoint) -> BoxFuture<'a, BobResult<SyncStatus>> {
        Box::pin(async move {
            let body = json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": 1,
                "method": methods::SYNCING,
                "params": [],
            });

            let response = self
                .client
                .post(node.status_url.clone())
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(BobError::Http(format!("non-success status {}", status)));
            }

            let frame: HttpResponse = response.json().await?;
            match (frame.result, frame.error) {
                (_, Some(error)) => Err(error.into()),
                (Some(result), None) => Ok(serde_json::from_value(result)?),
                (None, None) => Err(BobError::Http("empty status response".to_string())),
            }
        })
    }
}

/// Probes all nodes and maintains their health records.
pub struct HealthProber {
    pool: Arc<NodePool>,
    probe: Arc<dyn StatusProbe>,
    events: EventSink,
    failure_threshold: u32,
}

impl HealthProber {
    pub fn new(
        pool: Arc<NodePool>,
        probe: Arc<dyn StatusProbe>,
        events: EventSink,
        failure_threshold: u32,
    ) -> Self {
        Self {
            pool,
            probe,
            events,
            failure_threshold,
        }
    }

    /// Probe every node concurrently and wait for all of them. Never fails;
    /// probe errors are recorded on the node.
    pub async fn probe_all(&self) {
        join_all(self.pool.endpoints().iter().map(|node| self.probe_one(node))).await;
    }

    async fn probe_one(&self, node: &NodeEndpoint) {
        let started = Instant::now();
        let result = self.probe.probe(node).await;

        match result {
            Ok(status) => {
                let latency = started.elapsed();
                let transition = self
                    .pool
                    .update(node.id, |s| s.record_success(status.current_tick, latency))
                    .flatten();

                tracing::trace!(
                    node = %node.label(),
                    tick = status.current_tick,
                    latency_ms = latency.as_millis() as u64,
                    "Probe succeeded"
                );
                metrics::record_node_cursor(node.label(), status.current_tick);
                metrics::record_probe_latency(node.label(), latency);

                if transition == Some(HealthTransition::Recovered) {
                    tracing::info!(node = %node.label(), tick = status.current_tick, "Node recovered");
                    self.events.emit(ConnectionEvent::NodeRecovered {
                        node: node.label().to_string(),
                    });
                }
                metrics::record_node_health(node.label(), true);
            }
            Err(e) => {
                let threshold = self.failure_threshold;
                let Some((transition, failures, available)) = self.pool.update(node.id, |s| {
                    (s.record_failure(threshold), s.consecutive_failures, s.is_available)
                }) else {
                    return;
                };

                tracing::warn!(
                    node = %node.label(),
                    error = %e,
                    consecutive_failures = failures,
                    "Probe failed"
                );

                if transition == Some(HealthTransition::Unavailable) {
                    tracing::warn!(node = %node.label(), consecutive_failures = failures, "Node marked unavailable");
                    self.events.emit(ConnectionEvent::NodeUnavailable {
                        node: node.label().to_string(),
                        consecutive_failures: failures,
                    });
                }
                metrics::record_node_health(node.label(), available);
            }
        }
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }
}

impl std::fmt::Debug for HealthProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProber")
            .field("nodes", &self.pool.len())
            .field("failure_threshold", &self.failure_threshold)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::node::{select_best, NodeId};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Per-node scripted status: `Some(tick)` answers, `None` fails.
    #[derive(Default)]
    pub(crate) struct ScriptedProbe {
        pub answers: Mutex<HashMap<NodeId, Option<u64>>>,
        pub delay: Duration,
    }

    impl ScriptedProbe {
        pub(crate) fn set(&self, node: usize, answer: Option<u64>) {
            self.answers.lock().unwrap().insert(NodeId(node), answer);
        }
    }

    impl StatusProbe for ScriptedProbe {
        fn probe<'a>(&'a self, node: &'a NodeEndpoint) -> BoxFuture<'a, BobResult<SyncStatus>> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                let answer = self.answers.lock().unwrap().get(&node.id).copied().flatten();
                match answer {
                    Some(tick) => Ok(SyncStatus {
                        epoch: 1,
                        current_tick: tick,
                        initial_tick: 0,
                        syncing: false,
                    }),
                    None => Err(BobError::Http("connection refused".to_string())),
                }
            })
        }
    }

    fn prober(probe: Arc<ScriptedProbe>, events: EventSink) -> HealthProber {
        let config = ClientConfig::with_nodes(["http://a:1", "http://b:2"]);
        let pool = Arc::new(NodePool::new(&config).unwrap());
        HealthProber::new(pool, probe, events, 3)
    }

    fn collect(events: &EventSink) -> Arc<Mutex<Vec<ConnectionEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        events.add_observer(move |e| s.lock().unwrap().push(e.clone()));
        seen
    }

    #[tokio::test]
    async fn test_failing_node_becomes_unavailable() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.set(0, None);
        probe.set(1, Some(500));
        let events = EventSink::new();
        let seen = collect(&events);
        let prober = prober(probe, events);

        for round in 1..=3 {
            prober.probe_all().await;
            let snapshot = prober.pool().snapshot();
            assert_eq!(snapshot[0].consecutive_failures, round);
            assert_eq!(snapshot[0].is_available, round < 3);
        }

        let snapshot = prober.pool().snapshot();
        assert_eq!(select_best(&snapshot).unwrap().node, NodeId(1));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionEvent::NodeUnavailable {
                node: "http://a:1".into(),
                consecutive_failures: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_recovery_emits_event() {
        let probe = Arc::new(ScriptedProbe::default());
        probe.set(0, None);
        probe.set(1, Some(10));
        let events = EventSink::new();
        let seen = collect(&events);
        let prober = prober(probe.clone(), events);

        for _ in 0..3 {
            prober.probe_all().await;
        }
        probe.set(0, Some(42));
        prober.probe_all().await;

        let state = prober.pool().state(NodeId(0)).unwrap();
        assert!(state.is_available);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_observed_cursor, 42);
        assert_eq!(
            seen.lock().unwrap().last(),
            Some(&ConnectionEvent::NodeRecovered { node: "http://a:1".into() })
        );
    }

    #[tokio::test]
    async fn test_probes_run_concurrently() {
        let probe = Arc::new(ScriptedProbe {
            delay: Duration::from_millis(150),
            ..Default::default()
        });
        probe.set(0, Some(1));
        probe.set(1, Some(2));
        let prober = prober(probe, EventSink::new());

        let started = Instant::now();
        prober.probe_all().await;
        assert!(started.elapsed() < Duration::from_millis(280));
        assert_eq!(prober.pool().state(NodeId(1)).unwrap().last_observed_cursor, 2);
    }
}
