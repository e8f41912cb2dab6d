//! Outbound HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! ResilientClient::send(req)
//!     → timeout (whole logical request, retries included)
//!     → retry.rs (replay on transient failure, final attempt on a fresh pool)
//!     → client.rs (hyper-util pooled client)
//!     → connector.rs (dial, wrap)
//!     → connection.rs (fail I/O once past max lifetime)
//! ```
//!
//! # Design Decisions
//! - Lifetime is enforced at the I/O layer, below the pool
//! - The retry wrapper is generic over [`retry::Transport`] and testable
//!   without sockets

use std::time::Duration;

use crate::lifecycle::cancel::CancelCause;
use crate::BoxError;

pub mod client;
pub mod connection;
pub mod connector;
pub mod retry;

pub use client::{HyperTransport, ResilientClient};
pub use connection::{ConnectionExpired, PooledConnection};
pub use connector::LifetimeConnector;
pub use retry::{with_replayable_body, BodyRegenerator, RetryPolicy, RetryTransport, Transport};

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("request body cannot be replayed for a retry")]
    BodyNotReplayable,
    #[error("outbound request failed: {0}")]
    Request(#[source] BoxError),
    #[error("outbound request timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Cancelled(CancelCause),
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] hyper::http::Error),
}
