//! Concurrency bulkhead.
//!
//! # Responsibilities
//! - Bound simultaneous in-flight operations to a fixed capacity
//! - Wait at most `acquire_timeout` for a free slot
//! - Release each slot exactly once, whatever way the guarded call ends
//!
//! # Design Decisions
//! - Slots are owned semaphore permits held by a RAII guard, so a panic
//!   unwinding through the call still returns the slot

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::BulkheadConfig;
use crate::lifecycle::cancel::{CancelCause, CancelScope};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BulkheadError {
    /// No slot freed up within the acquire timeout.
    #[error("bulkhead full ({capacity} in flight)")]
    Full { capacity: usize },
    /// The caller's scope ended while waiting.
    #[error(transparent)]
    Cancelled(#[from] CancelCause),
}

#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
    in_flight: Arc<AtomicU64>,
}

impl Bulkhead {
    pub fn new(capacity: usize, acquire_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            acquire_timeout,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &BulkheadConfig) -> Self {
        Self::new(
            config.max_concurrent,
            Duration::from_millis(config.acquire_timeout_ms),
        )
    }

    /// Acquire a slot, waiting up to the acquire timeout.
    ///
    /// When `scope` is given, its cancellation or deadline also ends the wait.
    pub async fn acquire(
        &self,
        scope: Option<&CancelScope>,
    ) -> Result<BulkheadPermit, BulkheadError> {
        let acquire = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        );

        let acquired = match scope {
            Some(scope) => tokio::select! {
                biased;
                result = acquire => result,
                cause = scope.cancelled() => return Err(BulkheadError::Cancelled(cause)),
            },
            None => acquire.await,
        };

        match acquired {
            Ok(Ok(permit)) => {
                let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                metrics::set_bulkhead_in_flight(in_flight);
                Ok(BulkheadPermit {
                    _permit: permit,
                    in_flight: Arc::clone(&self.in_flight),
                })
            }
            // The semaphore is never closed; treat it like exhaustion if it is.
            Ok(Err(_)) | Err(_) => Err(BulkheadError::Full {
                capacity: self.capacity,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// A held bulkhead slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicU64>,
}

impl Drop for BulkheadPermit {
    fn drop(&mut self) {
        let in_flight = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_bulkhead_in_flight(in_flight);
    }
}
