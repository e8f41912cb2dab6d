//! Request timeout enforcement.
//!
//! # Responsibilities
//! - Bound the total handling time of each request
//! - Publish the bounded scope to inner stages and the handler through
//!   request extensions, so suspension points below can observe it
//!
//! # Design Decisions
//! - A handler that already produced its response wins; expiry after that is
//!   never turned into a second response

use std::time::Duration;

use axum::extract::Request;
use futures_util::future::BoxFuture;

use crate::http::middleware::pipeline::{Interceptor, Next};
use crate::http::response::{Failure, Outcome};
use crate::lifecycle::cancel::CancelScope;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy)]
pub struct RequestTimeout {
    timeout: Duration,
}

impl RequestTimeout {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// The request's scope, or a fresh root scope if no outer layer attached one.
pub fn request_scope(req: &Request) -> CancelScope {
    req.extensions()
        .get::<CancelScope>()
        .cloned()
        .unwrap_or_default()
}

impl Interceptor for RequestTimeout {
    fn intercept<'a>(&'a self, mut req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        let scope = request_scope(&req).child_with_timeout(self.timeout);
        req.extensions_mut().insert(scope.clone());

        Box::pin(async move {
            tokio::select! {
                biased;
                outcome = next.run(req) => outcome,
                cause = scope.cancelled() => {
                    // Wake anything downstream that holds the scope's token.
                    scope.cancel();
                    let failure = Failure::from(cause);
                    tracing::debug!(
                        timeout_ms = self.timeout.as_millis() as u64,
                        cause = %cause,
                        "Request ended before handler finished"
                    );
                    metrics::record_rejection(failure.kind());
                    Err(failure)
                }
            }
        })
    }

    fn bypasses_probes(&self) -> bool {
        true
    }
}
