//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the runtime.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::readiness::TrafficMode;

/// Root configuration for a service built on the runtime.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Listener configuration (bind address, drain).
    pub listener: ListenerConfig,

    /// Readiness reporting.
    pub readiness: ReadinessConfig,

    /// Inbound admission control.
    pub admission: AdmissionConfig,

    /// Outbound HTTP client.
    pub outbound: OutboundConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Upper bound on draining in-flight requests at shutdown, in seconds.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            drain_timeout_secs: 30,
        }
    }
}

/// Readiness configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReadinessConfig {
    /// `standalone` or `orchestrated`.
    pub traffic_mode: TrafficMode,
}

/// Admission pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Total handling budget per request in milliseconds. 0 disables the timeout stage.
    pub request_timeout_ms: u64,

    /// Recover handler panics into 500 responses.
    pub recover_panics: bool,

    pub rate_limit: RateLimitConfig,

    pub bulkhead: BulkheadConfig,

    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            recover_panics: true,
            rate_limit: RateLimitConfig::default(),
            bulkhead: BulkheadConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Process-wide refill rate.
    pub requests_per_second: u32,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: 100,
            burst_size: 50,
        }
    }
}

/// Concurrency bulkhead configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Enable the bulkhead.
    pub enabled: bool,

    /// Maximum simultaneous in-flight requests.
    pub max_concurrent: usize,

    /// How long a request may wait for a slot, in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent: 256,
            acquire_timeout_ms: 100,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker.
    pub enabled: bool,

    /// Breaker name used in logs, metrics and events.
    pub name: String,

    /// Consecutive server faults that open the breaker.
    pub failure_threshold: u32,

    /// Time spent open before trial calls, in milliseconds.
    pub open_interval_ms: u64,

    /// Concurrent trial calls while half-open.
    pub half_open_max_calls: u32,

    /// Closed-state counter reset period in milliseconds. 0 never resets.
    pub window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "inbound".to_string(),
            failure_threshold: 5,
            open_interval_ms: 30_000,
            half_open_max_calls: 1,
            window_ms: 0,
        }
    }
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Budget for one logical request, retries included, in seconds.
    pub timeout_secs: u64,

    /// Idle connections kept per host. Also sizes the retry budget.
    pub max_idle_per_host: usize,

    /// Idle connections are closed after this many seconds.
    pub idle_timeout_secs: u64,

    /// Connections are retired after this many seconds, idle or not.
    pub max_lifetime_secs: u64,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_idle_per_host: 10,
            idle_timeout_secs: 90,
            max_lifetime_secs: 60,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
