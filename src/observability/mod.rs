//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Admission stages, breaker transitions, outbound retries, workers:
//!     → logging.rs (structured events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms via `metrics`)
//!
//! Consumers:
//!     → stdout, pretty or JSON
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Every request log line carries its request ID
//! - Rejections are labelled by failure kind, never logged as errors
//! - The exporter is installed once, before the listener binds

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
