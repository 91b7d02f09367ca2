//! JSON-RPC protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Caller → multiplexer.rs (allocate id, register completion)
//!     → types.rs (encode request frame)
//!     → FrameSink (active socket)
//!
//! Receive loop → types.rs (classify frame)
//!     → Response: multiplexer.rs resolves the matching completion
//!     → Notification: subscription registry dispatches by server id
//! ```
//!
//! # Design Decisions
//! - Exactly one completion per request id
//! - Unknown ids are logged and dropped, never surfaced as errors
//! - Malformed frames are discarded; the receive loop keeps going

pub mod methods;
pub mod multiplexer;
pub mod types;

pub use multiplexer::{FrameSink, RequestMultiplexer, ResponseHook};
pub use types::{Incoming, RpcErrorObject};
