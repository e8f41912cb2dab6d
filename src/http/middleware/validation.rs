//! Schema validation stage.
//!
//! The runtime does not know request schemas; services plug in a
//! [`RequestValidator`] that inspects the request head before the handler runs.

use axum::extract::Request;
use futures_util::future::BoxFuture;

use crate::http::middleware::pipeline::{Interceptor, Next};
use crate::http::response::{Failure, Outcome};

pub trait RequestValidator: Send + Sync {
    fn validate(&self, req: &Request) -> Result<(), Failure>;
}

impl<F> RequestValidator for F
where
    F: Fn(&Request) -> Result<(), Failure> + Send + Sync,
{
    fn validate(&self, req: &Request) -> Result<(), Failure> {
        self(req)
    }
}

pub struct SchemaValidation<V> {
    validator: V,
}

impl<V: RequestValidator> SchemaValidation<V> {
    pub fn new(validator: V) -> Self {
        Self { validator }
    }
}

impl<V: RequestValidator> Interceptor for SchemaValidation<V> {
    fn intercept<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        match self.validator.validate(&req) {
            Ok(()) => next.run(req),
            Err(failure) => {
                tracing::debug!(path = %req.uri().path(), error = %failure, "Request failed validation");
                Box::pin(async move { Err(failure) })
            }
        }
    }
}
