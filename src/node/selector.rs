//! Best-node selection.
//!
//! Pure functions over health snapshots: no I/O, no locks, deterministic.

use std::cmp::Ordering;

use crate::health::state::NodeHealthState;

fn rank(a: &NodeHealthState, b: &NodeHealthState) -> Ordering {
    b.last_observed_cursor
        .cmp(&a.last_observed_cursor)
        .then_with(|| a.latency.cmp(&b.latency))
}

/// The available node with the highest cursor, ties broken by lowest
/// latency (then configuration order). `None` iff nothing is available.
pub fn select_best(nodes: &[NodeHealthState]) -> Option<&NodeHealthState> {
    nodes
        .iter()
        .filter(|n| n.is_available)
        .min_by(|a, b| rank(a, b))
}

/// Every available node, best first.
pub fn rank_available(nodes: &[NodeHealthState]) -> Vec<&NodeHealthState> {
    let mut available: Vec<_> = nodes.iter().filter(|n| n.is_available).collect();
    available.sort_by(|a, b| rank(a, b));
    available
}

/// Whether the client should leave `active` for `best`.
pub fn should_switch(active: &NodeHealthState, best: &NodeHealthState, threshold_ticks: u64) -> bool {
    if active.node == best.node {
        return false;
    }
    if !active.is_available {
        return true;
    }
    best.last_observed_cursor > active.last_observed_cursor.saturating_add(threshold_ticks)
}
