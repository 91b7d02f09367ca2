//! Client error definitions.

use thiserror::Error;

use crate::config::ConfigError;

/// Why an in-flight operation was abandoned without a server answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The socket carrying the request dropped.
    Disconnected,
    /// The client was shut down.
    Shutdown,
    /// The caller's cancellation token fired.
    Requested,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Disconnected => write!(f, "connection lost"),
            CancelReason::Shutdown => write!(f, "client shut down"),
            CancelReason::Requested => write!(f, "cancelled by caller"),
        }
    }
}

/// Errors that can occur while talking to Bob nodes.
#[derive(Debug, Error)]
pub enum BobError {
    /// Configuration rejected before any connection attempt.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The node list is empty.
    #[error("No nodes configured")]
    NoNodes,

    /// Every configured node failed its probe or refused the connection.
    #[error("No node available")]
    NoNodeAvailable,

    /// The client was shut down; no further calls are accepted.
    #[error("Client has been shut down")]
    Shutdown,

    /// There is no open socket to write to.
    #[error("Not connected")]
    NotConnected,

    /// The request was abandoned without a response.
    #[error("Request cancelled: {0}")]
    Cancelled(CancelReason),

    /// No response arrived within the request deadline.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The node answered with a JSON-RPC error object.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered with a result of the wrong shape.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// WebSocket handshake or framing failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The WebSocket handshake did not finish in time.
    #[error("Connect timed out after {0} ms")]
    ConnectTimeout(u64),

    /// HTTP status probe failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A node URL could not be turned into an endpoint.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl BobError {
    /// True for outcomes produced locally instead of by the server.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BobError::Cancelled(_) | BobError::Timeout(_))
    }
}

impl From<reqwest::Error> for BobError {
    fn from(e: reqwest::Error) -> Self {
        BobError::Http(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BobError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BobError::WebSocket(e.to_string())
    }
}

/// Result type for client operations.
pub type BobResult<T> = Result<T, BobError>;
