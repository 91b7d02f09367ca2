//! Node endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single configured Bob node
//! - Pre-compute the HTTP status URL and the WebSocket URL

use url::Url;

use crate::client::error::{BobError, BobResult};

/// Position of a node in the configured list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A single configured node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub id: NodeId,
    /// The URL as configured.
    pub base_url: Url,
    /// Pre-calculated HTTP JSON-RPC URL used for status probes.
    pub status_url: Url,
    /// Pre-calculated WebSocket URL.
    pub ws_url: Url,
}

impl NodeEndpoint {
    pub fn new(id: NodeId, base: &str, status_path: &str, ws_path: &str) -> BobResult<Self> {
        let base_url = Url::parse(base).map_err(|e| BobError::InvalidUrl {
            url: base.to_string(),
            reason: e.to_string(),
        })?;
        let status_url = derive_status_url(&base_url, status_path)?;
        let ws_url = derive_ws_url(&base_url, ws_path)?;
        Ok(Self {
            id,
            base_url,
            status_url,
            ws_url,
        })
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }
}

/// Same scheme, host and port as `base`, with the path replaced.
pub fn derive_status_url(base: &Url, path: &str) -> BobResult<Url> {
    rebuild(base, base.scheme(), path)
}

/// `https` → `wss`, anything else → `ws`; host and port preserved, path
/// replaced.
pub fn derive_ws_url(base: &Url, path: &str) -> BobResult<Url> {
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    rebuild(base, scheme, path)
}

fn rebuild(base: &Url, scheme: &str, path: &str) -> BobResult<Url> {
    let invalid = |reason: String| BobError::InvalidUrl {
        url: base.to_string(),
        reason,
    };

    let host = base
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let port = base.port().map(|p| format!(":{}", p)).unwrap_or_default();
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    Url::parse(&format!("{}://{}{}{}", scheme, host, port, path)).map_err(|e| invalid(e.to_string()))
}
