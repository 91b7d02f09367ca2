//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events (structured fields: node, attempt, subscription)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stderr)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - The library never installs a subscriber or recorder on its own;
//!   binaries call `init_logging` / `init_metrics`
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
