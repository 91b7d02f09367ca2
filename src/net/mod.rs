//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Selected node
//!     → connection.rs (connect lock, WebSocket handshake, state machine)
//!     → read half handed to the client's receive loop
//!     → write half shared by every outbound request
//!
//! Connection States:
//!     Disconnected → Connecting → Connected
//!     Connected → Reconnecting → Connected
//! ```
//!
//! # Design Decisions
//! - Exactly one socket is active at a time
//! - Connect attempts are serialized even when startup and a health-driven
//!   switch race
//! - TLS (`wss`) is enabled with the `tls` feature

pub mod connection;

pub use connection::{ConnectionManager, ConnectionState, WsReader};
