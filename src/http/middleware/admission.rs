//! Admission gates: rate limiter, circuit breaker and bulkhead stages.
//!
//! Each stage rejects before the handler runs and skips probe paths.

use std::sync::Arc;

use axum::extract::Request;
use futures_util::future::BoxFuture;

use crate::http::middleware::pipeline::{Interceptor, Next};
use crate::http::middleware::timeout::request_scope;
use crate::http::response::{Failure, Outcome};
use crate::lifecycle::cancel::CancelScope;
use crate::observability::metrics;
use crate::resilience::{Bulkhead, BulkheadError, CircuitBreaker, RateLimiter, Verdict};

/// Rejects with `rate_limited` when the shared bucket is empty.
#[derive(Debug)]
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl Interceptor for RateLimitStage {
    fn intercept<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        if !self.limiter.try_acquire() {
            tracing::debug!(path = %req.uri().path(), "Rate limit exceeded");
            let failure = Failure::rate_limited();
            metrics::record_rejection(failure.kind());
            return Box::pin(async move { Err(failure) });
        }
        next.run(req)
    }

    fn bypasses_probes(&self) -> bool {
        true
    }
}

/// Fails fast while the breaker is open and feeds it each outcome.
#[derive(Debug)]
pub struct CircuitBreakerStage {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerStage {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    /// Requests aborted by an outer stage never count toward the breaker,
    /// whatever the handler returned.
    fn aborted_requests_are_ignored(scope: &CancelScope) -> bool {
        scope.cause().is_some()
    }

    fn verdict(&self, scope: &CancelScope, outcome: &Outcome) -> Verdict {
        if Self::aborted_requests_are_ignored(scope) {
            return Verdict::Ignored;
        }
        self.breaker.policy().classify(outcome)
    }
}

impl Interceptor for CircuitBreakerStage {
    fn intercept<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        let scope = request_scope(&req);
        Box::pin(async move {
            let call = match self.breaker.try_acquire() {
                Ok(call) => call,
                Err(open) => {
                    tracing::debug!(breaker = %open.name, state = %open.state, "Circuit breaker rejected request");
                    let failure = Failure::breaker_open(&open.name);
                    metrics::record_rejection(failure.kind());
                    return Err(failure);
                }
            };

            let outcome = next.run(req).await;
            call.record(self.verdict(&scope, &outcome));
            outcome
        })
    }

    fn bypasses_probes(&self) -> bool {
        true
    }
}

/// Holds a bulkhead slot for the rest of the chain.
#[derive(Debug)]
pub struct BulkheadStage {
    bulkhead: Arc<Bulkhead>,
}

impl BulkheadStage {
    pub fn new(bulkhead: Arc<Bulkhead>) -> Self {
        Self { bulkhead }
    }
}

impl Interceptor for BulkheadStage {
    fn intercept<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        let scope = request_scope(&req);
        Box::pin(async move {
            let _permit = match self.bulkhead.acquire(Some(&scope)).await {
                Ok(permit) => permit,
                Err(BulkheadError::Full { capacity }) => {
                    tracing::warn!(capacity, "Bulkhead full, rejecting request");
                    let failure = Failure::bulkhead_full();
                    metrics::record_rejection(failure.kind());
                    return Err(failure);
                }
                Err(BulkheadError::Cancelled(cause)) => return Err(Failure::from(cause)),
            };
            next.run(req).await
        })
    }

    fn bypasses_probes(&self) -> bool {
        true
    }
}
