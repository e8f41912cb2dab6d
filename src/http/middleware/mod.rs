//! Inbound admission pipeline.
//!
//! # Data Flow
//! ```text
//! Request
//!     → recovery.rs     panic → 500                    (priority 0)
//!     → timeout.rs      deadline → 504                 (priority 10)
//!     → admission.rs    rate limit → 429               (priority 20)
//!                       breaker open → 503             (priority 30)
//!                       bulkhead full → 503            (priority 40)
//!     → logging.rs      request ID, access log         (priority 50)
//!     → validation.rs   service-provided checks        (priority 60)
//!     → translation.rs  service-provided error format  (priority 70)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - Stages are built once and shared by every request
//! - Probe paths skip every gate so orchestrators always get an answer
//! - layer.rs exposes the whole chain as one tower layer

pub mod admission;
pub mod layer;
pub mod logging;
pub mod pipeline;
pub mod recovery;
pub mod timeout;
pub mod translation;
pub mod validation;

pub use layer::{AdmissionLayer, AdmissionService};
pub use pipeline::{
    is_bypass_path, priority, AdmissionPipeline, AdmissionPipelineBuilder, Endpoint, Interceptor,
    Next, PROBE_PATHS,
};
pub use timeout::request_scope;
pub use translation::ErrorTranslator;
pub use validation::RequestValidator;
