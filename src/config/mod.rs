//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BobConfig (validated, immutable)
//!     → ClientConfig handed to BobClient::builder
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a client is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - The connection event callback is not part of the file format; it is
//!   registered on the client builder

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{BobConfig, ClientConfig, ObservabilityConfig};
pub use validation::{validate_config, ValidationError};
