//! Node pool management.
//!
//! # Responsibilities
//! - Own the fixed set of configured endpoints
//! - Own one health record per endpoint
//! - Hand out consistent snapshots for selection

use std::sync::{Arc, Mutex, PoisonError};

use crate::client::error::{BobError, BobResult};
use crate::config::ClientConfig;
use crate::health::state::NodeHealthState;
use crate::node::endpoint::{NodeEndpoint, NodeId};

/// The configured nodes and their health records.
#[derive(Debug)]
pub struct NodePool {
    endpoints: Vec<Arc<NodeEndpoint>>,
    states: Vec<Mutex<NodeHealthState>>,
}

impl NodePool {
    /// Build the pool from configuration.
    pub fn new(config: &ClientConfig) -> BobResult<Self> {
        if config.nodes.is_empty() {
            return Err(BobError::NoNodes);
        }

        let mut endpoints = Vec::with_capacity(config.nodes.len());
        let mut states = Vec::with_capacity(config.nodes.len());
        for (i, url) in config.nodes.iter().enumerate() {
            let endpoint = NodeEndpoint::new(
                NodeId(i),
                url,
                &config.http_status_path,
                &config.web_socket_path,
            )?;
            states.push(Mutex::new(NodeHealthState::new(endpoint.id, endpoint.label())));
            endpoints.push(Arc::new(endpoint));
        }

        Ok(Self { endpoints, states })
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Arc<NodeEndpoint>] {
        &self.endpoints
    }

    pub fn endpoint(&self, id: NodeId) -> Option<Arc<NodeEndpoint>> {
        self.endpoints.get(id.0).cloned()
    }

    /// Copy of one node's health record.
    pub fn state(&self, id: NodeId) -> Option<NodeHealthState> {
        self.states
            .get(id.0)
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    /// Copy of every health record, in configuration order.
    pub fn snapshot(&self) -> Vec<NodeHealthState> {
        self.states
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect()
    }

    /// Mutate one node's record under its lock.
    pub fn update<R>(&self, id: NodeId, f: impl FnOnce(&mut NodeHealthState) -> R) -> Option<R> {
        self.states
            .get(id.0)
            .map(|s| f(&mut s.lock().unwrap_or_else(PoisonError::into_inner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_from_config() {
        let config = ClientConfig::with_nodes(["http://a:1", "https://b"]);
        let pool = NodePool::new(&config).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.endpoint(NodeId(1)).unwrap().ws_url.as_str(), "wss://b/ws/qubic");

        pool.update(NodeId(0), |s| s.record_failure(1));
        let snapshot = pool.snapshot();
        assert!(!snapshot[0].is_available);
        assert!(snapshot[1].is_available);
        assert_eq!(snapshot[0].base_url, "http://a:1");
    }

    #[test]
    fn test_empty_pool_rejected() {
        let err = NodePool::new(&ClientConfig::default()).unwrap_err();
        assert!(matches!(err, BobError::NoNodes));
    }
}
