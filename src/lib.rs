//! Service Runtime Library
//!
//! Resilience and lifecycle control plane for HTTP services: readiness,
//! admission control, outbound calls, and background workers.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod outbound;
pub mod readiness;
pub mod resilience;

/// Boxed error used where the concrete failure type is not known.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use config::schema::RuntimeConfig;
pub use http::middleware::AdmissionPipeline;
pub use http::HttpServer;
pub use lifecycle::{Bootstrap, CancelScope, Shutdown, Worker, WorkerOptions};
pub use outbound::ResilientClient;
pub use readiness::{ReadinessCoordinator, TrafficMode};
