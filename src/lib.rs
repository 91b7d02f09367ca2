//! Resilient multi-node JSON-RPC-over-WebSocket client for Bob nodes.
//!
//! # Architecture Overview
//!
//! ```text
//!   health prober ──▶ node selector ──▶ connection manager ──▶ one socket
//!        ▲                                     │                   │
//!        │                                     ▼                   ▼
//!   reconnect orchestrator ◀── socket lost ── receive loop ──┬── request multiplexer
//!                                                          └── subscription registry
//! ```

// Core subsystems
pub mod client;
pub mod config;
pub mod net;
pub mod node;
pub mod rpc;
pub mod subscription;

// Failure handling
pub mod health;
pub mod resilience;

// Cross-cutting concerns
pub mod events;
pub mod lifecycle;
pub mod observability;

pub use client::error::{BobError, BobResult, CancelReason};
pub use client::{BobClient, BobClientBuilder};
pub use config::{BobConfig, ClientConfig};
pub use events::{ConnectionEvent, EventSink};
pub use net::ConnectionState;
pub use rpc::types::SyncStatus;
pub use subscription::{LogEvent, LogStreamItem, NewTick, Subscription, SubscriptionKind, TickEvent};
