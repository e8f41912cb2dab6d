//! Panic recovery, the outermost stage.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::extract::Request;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::middleware::pipeline::{Interceptor, Next};
use crate::http::response::{Failure, FailureKind, Outcome};
use crate::observability::metrics;

/// Turns a panic anywhere below it into a `panic_recovered` failure.
///
/// Guards held by inner stages (bulkhead slots, breaker calls) are released
/// by the unwind before this stage sees the panic.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanicRecovery;

impl Interceptor for PanicRecovery {
    fn intercept<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        Box::pin(async move {
            match AssertUnwindSafe(next.run(req)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    tracing::error!(
                        method = %method,
                        path = %path,
                        panic = %panic_message(payload.as_ref()),
                        "Handler panicked"
                    );
                    metrics::record_rejection(FailureKind::PanicRecovered);
                    Err(Failure::panic_recovered())
                }
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
