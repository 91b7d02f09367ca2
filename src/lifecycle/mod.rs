//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger → master token cancelled
//!             → receive loop, health loop and reconnect loop exit
//!             → every subscription handle's child token cancelled
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → CLI calls BobClient::shutdown
//! ```
//!
//! # Design Decisions
//! - One master token; nothing else signals termination
//! - Shutdown has a timeout: background tasks get a bounded window to exit

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
