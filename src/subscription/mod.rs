//! Streaming subscriptions.
//!
//! # Data Flow
//! ```text
//! subscribe_*()  → registry.rs (entry + handle, buffered channel)
//!                → qubic_subscribe, server id bound as route
//! notification   → registry.rs (route by server id, decode, deliver)
//!                → handle.rs (caller receives typed items)
//! reconnect      → every entry resubscribed with kinds.rs resume params
//!                → new server id re-keyed before its first notification
//! ```

pub mod handle;
pub mod kinds;
pub mod registry;

pub use handle::Subscription;
pub use kinds::{Cursor, LogEvent, LogStreamItem, NewTick, Notification, SubscriptionKind, TickEvent};
pub use registry::{DispatchStatus, SubscriptionEntry, SubscriptionRegistry};
