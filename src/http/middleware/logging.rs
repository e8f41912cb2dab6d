//! Request logging stage.
//!
//! Assigns the request ID, logs completion with latency and records request
//! metrics. Rejections from outer stages never reach this stage, so they are
//! logged where they happen.

use axum::extract::Request;
use futures_util::future::BoxFuture;
use tokio::time::Instant;

use crate::http::middleware::pipeline::{Interceptor, Next};
use crate::http::request::{RequestId, X_REQUEST_ID};
use crate::http::response::Outcome;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestLogging;

impl Interceptor for RequestLogging {
    fn intercept<'a>(&'a self, mut req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        let request_id = RequestId::from_header(req.headers().get(X_REQUEST_ID));
        req.extensions_mut().insert(request_id.clone());
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let start = Instant::now();

        Box::pin(async move {
            let mut outcome = next.run(req).await;
            let status = match &outcome {
                Ok(response) => response.status(),
                Err(failure) => failure.status(),
            };
            let latency_ms = start.elapsed().as_millis() as u64;

            if let (Ok(response), Some(value)) = (&mut outcome, request_id.to_header_value()) {
                response.headers_mut().insert(X_REQUEST_ID, value);
            }

            if status.is_server_error() {
                tracing::warn!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    latency_ms,
                    "Request failed"
                );
            } else {
                tracing::info!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    status = status.as_u16(),
                    latency_ms,
                    "Request completed"
                );
            }
            metrics::record_request(method.as_str(), status.as_u16(), start);
            outcome
        })
    }
}
