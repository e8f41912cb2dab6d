//! Readiness subsystem.
//!
//! # Data Flow
//! ```text
//! Subsystem starts:
//!     → coordinator.add_component(name)
//!     → ... initialization ...
//!     → coordinator.mark_ready(name)
//!     → last component ready: all-ready fires (once, permanently)
//!
//! Consumers:
//!     → workers (wait_ready / wait_traffic_ready before running)
//!     → /readyz probe (status snapshot, orchestrated traffic notification)
//! ```
//!
//! # Design Decisions
//! - Component map behind a RwLock: probes read concurrently, registration is exclusive
//! - Signals are watch channels so every waiter wakes at once
//! - Traffic mode is fixed at construction

pub mod coordinator;
pub mod status;

pub use coordinator::{ReadinessCoordinator, ReadinessError, TrafficMode};
pub use status::{ComponentStatus, ReadinessStatus};
