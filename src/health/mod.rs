//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer (client health loop) or reconnect loop
//!     → prober.rs (probe every node concurrently, join)
//!     → state.rs (apply success/failure to the node record)
//!     → availability flips emitted as connection events
//! ```
//!
//! # Design Decisions
//! - A probe failure never escapes `probe_all`; it is recorded per node
//! - Marking a node unavailable requires consecutive failures
//! - Health state is per node, independent of which node is active

pub mod prober;
pub mod state;

pub use prober::{HealthProber, HttpStatusProbe, StatusProbe};
pub use state::{HealthTransition, NodeHealthState};
