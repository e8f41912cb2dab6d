//! Handler outcomes and failure responses.
//!
//! # Responsibilities
//! - One failure type for every stage of the admission pipeline and for handlers
//! - Map each failure kind to a status code and a JSON body
//!
//! # Design Decisions
//! - Stages see `Result<Response, Failure>` so the breaker can classify errors
//!   without parsing response bodies
//! - Conversion to an HTTP response happens once, at the edge

use std::borrow::Cow;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::lifecycle::cancel::CancelCause;

/// What a handler or pipeline stage produces.
pub type Outcome = Result<Response, Failure>;

/// Failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The caller sent something invalid.
    ClientInput,
    /// A bug or unexpected condition in the server.
    Internal,
    /// A dependency is unavailable.
    Unavailable,
    RateLimited,
    BulkheadFull,
    BreakerOpen,
    DeadlineExceeded,
    /// The request was abandoned before it finished.
    Cancelled,
    PanicRecovered,
}

impl FailureKind {
    pub fn status(self) -> StatusCode {
        match self {
            FailureKind::ClientInput => StatusCode::BAD_REQUEST,
            FailureKind::Internal | FailureKind::PanicRecovered => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            FailureKind::Unavailable | FailureKind::BulkheadFull | FailureKind::BreakerOpen => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            FailureKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            FailureKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            // nginx's "client closed request"
            FailureKind::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::ClientInput => "client_input",
            FailureKind::Internal => "internal",
            FailureKind::Unavailable => "unavailable",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::BulkheadFull => "bulkhead_full",
            FailureKind::BreakerOpen => "breaker_open",
            FailureKind::DeadlineExceeded => "deadline_exceeded",
            FailureKind::Cancelled => "cancelled",
            FailureKind::PanicRecovered => "panic_recovered",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Failure {
    kind: FailureKind,
    message: Cow<'static, str>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn client_input(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FailureKind::ClientInput, message)
    }

    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    pub fn unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(FailureKind::Unavailable, message)
    }

    pub fn rate_limited() -> Self {
        Self::new(FailureKind::RateLimited, "rate limit exceeded")
    }

    pub fn bulkhead_full() -> Self {
        Self::new(FailureKind::BulkheadFull, "too many concurrent requests")
    }

    pub fn breaker_open(name: &str) -> Self {
        Self::new(
            FailureKind::BreakerOpen,
            format!("circuit breaker '{name}' is open"),
        )
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(FailureKind::DeadlineExceeded, "request deadline exceeded")
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "request cancelled")
    }

    pub fn panic_recovered() -> Self {
        Self::new(FailureKind::PanicRecovered, "internal server error")
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl From<CancelCause> for Failure {
    fn from(cause: CancelCause) -> Self {
        match cause {
            CancelCause::DeadlineExceeded => Failure::deadline_exceeded(),
            CancelCause::Cancelled => Failure::cancelled(),
        }
    }
}

#[derive(Serialize)]
struct FailureBody<'a> {
    error: FailureKind,
    message: &'a str,
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let body = FailureBody {
            error: self.kind,
            message: &self.message,
        };
        (self.kind.status(), Json(body)).into_response()
    }
}

/// Flatten an [`Outcome`] into the response sent to the client.
pub fn into_response(outcome: Outcome) -> Response {
    outcome.unwrap_or_else(IntoResponse::into_response)
}
