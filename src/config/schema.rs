//! Configuration schema definitions.
//!
//! This module defines the configuration structure for the client and the
//! `bob-cli` binary. All types derive Serde traits for deserialization from
//! TOML files; every field has a default so minimal configs only list nodes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration file layout.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BobConfig {
    /// Node client settings.
    pub client: ClientConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Settings for the multi-node WebSocket client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Candidate node base URLs (e.g. "https://bob.example.org").
    pub nodes: Vec<String>,

    /// Path of the HTTP JSON-RPC endpoint used for status probes.
    pub http_status_path: String,

    /// Path of the WebSocket endpoint used for requests and subscriptions.
    pub web_socket_path: String,

    /// Interval between health probe rounds in milliseconds.
    pub health_check_interval_ms: u64,

    /// The active node must trail the best node by more than this many
    /// ticks before the client switches.
    pub switch_threshold_ticks: u64,

    /// Consecutive probe failures before a node is marked unavailable.
    pub failure_threshold: u32,

    /// First reconnect delay in milliseconds.
    pub initial_reconnect_delay_ms: u64,

    /// Reconnect delay cap in milliseconds.
    pub max_reconnect_delay_ms: u64,

    /// Per-subscription delivery buffer capacity.
    pub subscription_buffer_size: usize,

    /// Deadline for a single request/response exchange in milliseconds.
    pub request_timeout_ms: u64,

    /// Deadline for one status probe in milliseconds.
    pub probe_timeout_ms: u64,

    /// Deadline for the WebSocket handshake in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            http_status_path: "/qubic".to_string(),
            web_socket_path: "/ws/qubic".to_string(),
            health_check_interval_ms: 30_000,
            switch_threshold_ticks: 100,
            failure_threshold: 3,
            initial_reconnect_delay_ms: 5_000,
            max_reconnect_delay_ms: 60_000,
            subscription_buffer_size: 10_000,
            request_timeout_ms: 30_000,
            probe_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    /// Convenience constructor for the common case of a plain node list.
    pub fn with_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn initial_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
