//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Receive loop ends (close, error, end of stream) or health-driven switch:
//!     → reconnect.rs begin (Reconnecting, drop ids, cancel pending)
//!     → reconnect.rs loop:
//!         backoff.rs delay → probe all → select best → connect
//!     → reconnect.rs resubscribe (resume after last delivered cursor)
//! ```
//!
//! # Design Decisions
//! - Backoff is deterministic; no jitter
//! - The attempt counter lives on the connection manager and resets on
//!   every successful connect

pub mod backoff;
pub mod reconnect;

pub use backoff::calculate_backoff;
pub use reconnect::ReconnectOrchestrator;
