//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check node URLs parse and use an HTTP scheme
//! - Validate value ranges (thresholds >= 1, timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before a client is constructed

use thiserror::Error;
use url::Url;

use crate::config::schema::ClientConfig;

/// A single semantic problem in a [`ClientConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no nodes configured")]
    NoNodes,

    #[error("invalid node URL '{url}': {reason}")]
    InvalidNodeUrl { url: String, reason: String },

    #[error("node URL '{0}' must use http or https")]
    UnsupportedScheme(String),

    #[error("{field} must start with '/' (got '{value}')")]
    InvalidPath { field: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("initial reconnect delay ({initial_ms} ms) exceeds maximum ({max_ms} ms)")]
    ReconnectDelayOrder { initial_ms: u64, max_ms: u64 },
}

/// Validate a client configuration, collecting every problem found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.nodes.is_empty() {
        errors.push(ValidationError::NoNodes);
    }

    for node in &config.nodes {
        match Url::parse(node) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(_) => errors.push(ValidationError::UnsupportedScheme(node.clone())),
            Err(e) => errors.push(ValidationError::InvalidNodeUrl {
                url: node.clone(),
                reason: e.to_string(),
            }),
        }
    }

    for (field, value) in [
        ("http_status_path", &config.http_status_path),
        ("web_socket_path", &config.web_socket_path),
    ] {
        if !value.starts_with('/') {
            errors.push(ValidationError::InvalidPath {
                field,
                value: value.clone(),
            });
        }
    }

    let non_zero: [(&'static str, u64); 7] = [
        ("failure_threshold", config.failure_threshold as u64),
        ("subscription_buffer_size", config.subscription_buffer_size as u64),
        ("health_check_interval_ms", config.health_check_interval_ms),
        ("initial_reconnect_delay_ms", config.initial_reconnect_delay_ms),
        ("request_timeout_ms", config.request_timeout_ms),
        ("probe_timeout_ms", config.probe_timeout_ms),
        ("connect_timeout_ms", config.connect_timeout_ms),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if config.initial_reconnect_delay_ms > config.max_reconnect_delay_ms {
        errors.push(ValidationError::ReconnectDelayOrder {
            initial_ms: config.initial_reconnect_delay_ms,
            max_ms: config.max_reconnect_delay_ms,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
