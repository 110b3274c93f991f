//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check addresses parse and endpoints are well-formed URLs
//! - Validate value ranges (timeouts and intervals > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: AdapterConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::AdapterConfig;

/// One semantic problem found in a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate an adapter config, collecting every problem found.
pub fn validate_config(config: &AdapterConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(err("listener.bind_address", "not a valid socket address"));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(err("listener.request_timeout_secs", "must be positive"));
    }

    for (field, value) in [
        ("downstream.core_endpoint", &config.downstream.core_endpoint),
        ("downstream.upf_endpoint", &config.downstream.upf_endpoint),
    ] {
        match Url::parse(value) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(_) => errors.push(err(field, "scheme must be http or https")),
            Err(_) => errors.push(err(field, "not a valid URL")),
        }
    }

    if config.sync.retry_interval_secs == 0 {
        errors.push(err("sync.retry_interval_secs", "must be positive"));
    }
    if config.sync.post_timeout_secs == 0 {
        errors.push(err("sync.post_timeout_secs", "must be positive"));
    }
    if config.subscribe.sample_floor_secs == 0 {
        errors.push(err("subscribe.sample_floor_secs", "must be positive"));
    }
    if config.subscribe.queue_depth == 0 {
        errors.push(err("subscribe.queue_depth", "must be positive"));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(err(
            "observability.metrics_address",
            "not a valid socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn err(field: &str, message: &str) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.to_string(),
    }
}
