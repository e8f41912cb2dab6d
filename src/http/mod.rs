//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, graceful drain)
//!     → middleware/ (admission pipeline: recovery, timeout, gates, logging)
//!     → probes.rs or the service's own routes
//!     → response.rs (failures rendered as JSON with a stable status)
//!     → Send to client
//! ```

pub mod middleware;
pub mod probes;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestId, RequestIdExt, X_REQUEST_ID};
pub use response::{Failure, FailureKind, Outcome};
pub use server::HttpServer;
