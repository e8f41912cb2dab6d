//! Retry on transient transport failure.
//!
//! # Responsibilities
//! - Classify transport errors: expired connection, transient, permanent
//! - Replay the same logical request, regenerating its body when needed
//! - After the retry budget is spent, drop idle connections and try once more
//!
//! # Design Decisions
//! - No backoff between attempts: the failures retried here are connection
//!   level, and the next attempt usually gets a different connection
//! - Expired connections never consume retry budget

use std::fmt;
use std::io;
use std::sync::Arc;

use axum::body::{Body, Bytes, HttpBody};
use futures_util::future::BoxFuture;
use hyper::{Request, Response};

use crate::observability::metrics;
use crate::outbound::connection::ConnectionExpired;
use crate::outbound::OutboundError;
use crate::BoxError;

/// Upper bound on retries regardless of pool size.
pub const MAX_RETRIES_CAP: u32 = 5;

/// One round trip over some connection pool.
pub trait Transport: Send + Sync {
    fn round_trip(&self, req: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, BoxError>>;

    /// Drop every idle pooled connection so the next attempt dials fresh.
    fn close_idle_connections(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    /// `min(pool_size, MAX_RETRIES_CAP)` retries.
    pub fn for_pool_size(pool_size: usize) -> Self {
        let pool = u32::try_from(pool_size).unwrap_or(u32::MAX);
        Self {
            max_retries: pool.min(MAX_RETRIES_CAP),
        }
    }
}

/// How a failed attempt is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The pooled connection hit its lifetime. Free retry.
    Expired,
    /// Worth another attempt; the label is used for metrics.
    Transient(&'static str),
    Permanent,
}

/// Walk `err`'s source chain and classify the first recognizable cause.
pub fn classify(err: &(dyn std::error::Error + 'static)) -> FailureClass {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<ConnectionExpired>() {
            return FailureClass::Expired;
        }
        if let Some(io) = e.downcast_ref::<io::Error>() {
            // io::Error::source skips the wrapped error itself.
            if io
                .get_ref()
                .is_some_and(|inner| inner.is::<ConnectionExpired>())
            {
                return FailureClass::Expired;
            }
            if let Some(reason) = transient_io_kind(io.kind()) {
                return FailureClass::Transient(reason);
            }
        }
        if let Some(hyper_err) = e.downcast_ref::<hyper::Error>() {
            if hyper_err.is_incomplete_message() {
                return FailureClass::Transient("incomplete_message");
            }
            if hyper_err.is_closed() || hyper_err.is_canceled() {
                return FailureClass::Transient("connection_closed");
            }
        }
        current = e.source();
    }
    FailureClass::Permanent
}

fn transient_io_kind(kind: io::ErrorKind) -> Option<&'static str> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some("connection_refused"),
        io::ErrorKind::ConnectionReset => Some("connection_reset"),
        io::ErrorKind::ConnectionAborted => Some("connection_aborted"),
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => Some("unreachable"),
        io::ErrorKind::UnexpectedEof => Some("unexpected_eof"),
        io::ErrorKind::BrokenPipe => Some("broken_pipe"),
        io::ErrorKind::NotConnected => Some("not_connected"),
        _ => None,
    }
}

/// Rebuilds a request body for each retry.
///
/// Attach one as a request extension for requests whose body is not empty.
#[derive(Clone)]
pub struct BodyRegenerator(Arc<dyn Fn() -> Body + Send + Sync>);

impl BodyRegenerator {
    pub fn new(regenerate: impl Fn() -> Body + Send + Sync + 'static) -> Self {
        Self(Arc::new(regenerate))
    }

    /// Regenerator for an in-memory body.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::new(move || Body::from(bytes.clone()))
    }

    pub fn regenerate(&self) -> Body {
        (self.0)()
    }
}

impl fmt::Debug for BodyRegenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyRegenerator")
    }
}

/// Attach `bytes` as a body that survives retries.
pub fn with_replayable_body(mut req: Request<()>, bytes: Bytes) -> Request<Body> {
    req.extensions_mut()
        .insert(BodyRegenerator::from_bytes(bytes.clone()));
    req.map(|()| Body::from(bytes))
}

/// Produces one copy of the original request per attempt.
struct Replay {
    method: hyper::Method,
    uri: hyper::Uri,
    version: hyper::Version,
    headers: hyper::HeaderMap,
    regenerator: Option<BodyRegenerator>,
    empty_body: bool,
    first_body: Option<Body>,
}

impl Replay {
    fn new(req: Request<Body>) -> Self {
        let (parts, body) = req.into_parts();
        Self {
            regenerator: parts.extensions.get::<BodyRegenerator>().cloned(),
            empty_body: body.size_hint().exact() == Some(0),
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            first_body: Some(body),
        }
    }

    fn next(&mut self) -> Result<Request<Body>, OutboundError> {
        let body = match self.first_body.take() {
            Some(body) => body,
            None if self.empty_body => Body::empty(),
            None => match &self.regenerator {
                Some(regenerator) => regenerator.regenerate(),
                None => return Err(OutboundError::BodyNotReplayable),
            },
        };
        let mut req = Request::new(body);
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.version_mut() = self.version;
        *req.headers_mut() = self.headers.clone();
        Ok(req)
    }
}

/// Retries transient failures of an inner [`Transport`].
#[derive(Debug)]
pub struct RetryTransport<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: Transport> RetryTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn send(&self, req: Request<Body>) -> Result<Response<Body>, OutboundError> {
        let mut replay = Replay::new(req);
        let mut retries = 0;

        let last_error = loop {
            let attempt = replay.next()?;
            let err = match self.inner.round_trip(attempt).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            match classify(err.as_ref()) {
                FailureClass::Expired => {
                    tracing::debug!(uri = %replay.uri, "Pooled connection expired, retrying");
                    metrics::record_outbound_retry("expired");
                }
                FailureClass::Transient(reason) if retries < self.policy.max_retries => {
                    retries += 1;
                    tracing::debug!(
                        uri = %replay.uri,
                        reason,
                        attempt = retries,
                        max_retries = self.policy.max_retries,
                        "Transient outbound failure, retrying"
                    );
                    metrics::record_outbound_retry(reason);
                }
                FailureClass::Transient(_) => break err,
                FailureClass::Permanent => return Err(OutboundError::Request(err)),
            }
        };

        tracing::warn!(
            uri = %replay.uri,
            error = %last_error,
            retries,
            "Retry budget exhausted, closing idle connections for a final attempt"
        );
        self.inner.close_idle_connections();
        metrics::record_outbound_retry("final_attempt");
        let attempt = replay.next()?;
        self.inner
            .round_trip(attempt)
            .await
            .map_err(OutboundError::Request)
    }
}
