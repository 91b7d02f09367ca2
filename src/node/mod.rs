//! Node management subsystem.
//!
//! # Data Flow
//! ```text
//! ClientConfig.nodes
//!     → endpoint.rs (derive status URL and WebSocket URL)
//!     → pool.rs (one health record per endpoint)
//!     → health prober mutates records
//!     → selector.rs (pick best available node from a snapshot)
//! ```
//!
//! # Design Decisions
//! - The node set is fixed for the life of the client
//! - Selection is a pure function over snapshots; the active node is
//!   tracked by the connection manager, not stored on the record
//! - Unavailable nodes are excluded from selection

pub mod endpoint;
pub mod pool;
pub mod selector;

pub use endpoint::{NodeEndpoint, NodeId};
pub use pool::NodePool;
pub use selector::{rank_available, select_best, should_switch};
