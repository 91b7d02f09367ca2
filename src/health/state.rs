//! Node health state machine.
//!
//! # States
//! - Available: node is a selection candidate
//! - Unavailable: node excluded from selection
//!
//! # State Transitions
//! ```text
//! Available → Unavailable: consecutive failures reach failure_threshold
//! Unavailable → Available: any single successful probe
//! ```
//!
//! # Design Decisions
//! - Nodes start Available so a fresh client can use any node that answers
//! - One success resets the failure count, wherever it stood
//! - Transitions are returned to the caller, which owns logging and events

use std::time::{Duration, SystemTime};

use crate::node::endpoint::NodeId;

/// Per-node mutable health record.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeHealthState {
    pub node: NodeId,
    pub base_url: String,
    /// Last tick the node reported as processed.
    pub last_observed_cursor: u64,
    /// Round trip of the last successful probe.
    pub latency: Duration,
    /// Time of the last successful probe.
    pub last_checked_at: Option<SystemTime>,
    pub consecutive_failures: u32,
    pub is_available: bool,
}

/// An availability flip caused by a probe result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Recovered,
    Unavailable,
}

impl NodeHealthState {
    pub fn new(node: NodeId, base_url: impl Into<String>) -> Self {
        Self {
            node,
            base_url: base_url.into(),
            last_observed_cursor: 0,
            latency: Duration::ZERO,
            last_checked_at: None,
            consecutive_failures: 0,
            is_available: true,
        }
    }

    /// Apply a successful probe.
    pub fn record_success(&mut self, cursor: u64, latency: Duration) -> Option<HealthTransition> {
        self.last_observed_cursor = cursor;
        self.latency = latency;
        self.last_checked_at = Some(SystemTime::now());
        self.consecutive_failures = 0;

        if self.is_available {
            return None;
        }
        self.is_available = true;
        Some(HealthTransition::Recovered)
    }

    /// Apply a failed probe.
    pub fn record_failure(&mut self, failure_threshold: u32) -> Option<HealthTransition> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.is_available && self.consecutive_failures >= failure_threshold {
            self.is_available = false;
            return Some(HealthTransition::Unavailable);
        }
        None
    }
}
