//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (via the admission pipeline):
//!     → rate_limit.rs (take a token or reject, never waits)
//!     → circuit_breaker.rs (fail fast while the dependency is down)
//!     → bulkhead.rs (bounded concurrency, bounded wait for a slot)
//!     → handler
//!     → circuit_breaker.rs (verdict from the failure policy)
//! ```
//!
//! # Design Decisions
//! - Each primitive is usable on its own, outside the pipeline
//! - Admission rejections never count against the breaker
//! - All guards release on drop, including during a panic unwind

pub mod bulkhead;
pub mod circuit_breaker;
pub mod rate_limit;

pub use bulkhead::{Bulkhead, BulkheadError, BulkheadPermit};
pub use circuit_breaker::{
    BreakerCall, BreakerOpen, BreakerSettings, BreakerState, CircuitBreaker, FailurePolicy,
    ServerFaultPolicy, StateTransition, Verdict,
};
pub use rate_limit::RateLimiter;
