//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Build admission pipeline → Bind listener
//!     → Start workers → Mark server ready → Serve
//!
//! Shutdown (shutdown.rs):
//!     Signal or fatal worker error → Stop accepting → Drain → Stop workers → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Workers (worker.rs):
//!     start → [wait readiness] → run(token) → Stopped
//!
//! Cancellation (cancel.rs):
//!     Scope = token + optional deadline, children never outlive parents
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, stop workers
//! - Shutdown has timeout: draining gives up after the deadline
//! - The first requested exit code wins

pub mod cancel;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod worker;

pub use cancel::{CancelCause, CancelScope};
pub use shutdown::Shutdown;
pub use startup::{AdmissionGates, Bootstrap, StartupError, HTTP_SERVER_COMPONENT};
pub use worker::{Worker, WorkerError, WorkerOptions, WorkerState};
