//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RuntimeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RuntimeConfig;

/// A single semantic problem with a config value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check `config` and return every problem found.
pub fn validate_config(config: &RuntimeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let admission = &config.admission;
    if admission.rate_limit.enabled {
        if admission.rate_limit.requests_per_second == 0 {
            errors.push(ValidationError::new(
                "admission.rate_limit.requests_per_second",
                "must be greater than 0",
            ));
        }
        if admission.rate_limit.burst_size == 0 {
            errors.push(ValidationError::new(
                "admission.rate_limit.burst_size",
                "must be greater than 0",
            ));
        }
    }

    if admission.bulkhead.enabled && admission.bulkhead.max_concurrent == 0 {
        errors.push(ValidationError::new(
            "admission.bulkhead.max_concurrent",
            "must be greater than 0",
        ));
    }

    let breaker = &admission.circuit_breaker;
    if breaker.enabled {
        if breaker.name.trim().is_empty() {
            errors.push(ValidationError::new(
                "admission.circuit_breaker.name",
                "must not be empty",
            ));
        }
        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::new(
                "admission.circuit_breaker.failure_threshold",
                "must be greater than 0",
            ));
        }
        if breaker.half_open_max_calls == 0 {
            errors.push(ValidationError::new(
                "admission.circuit_breaker.half_open_max_calls",
                "must be greater than 0",
            ));
        }
    }

    if config.outbound.timeout_secs == 0 {
        errors.push(ValidationError::new(
            "outbound.timeout_secs",
            "must be greater than 0",
        ));
    }
    if config.outbound.max_lifetime_secs == 0 {
        errors.push(ValidationError::new(
            "outbound.max_lifetime_secs",
            "must be greater than 0",
        ));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
