//! Error-to-response translation stage, the innermost.
//!
//! Gives a service the chance to render handler failures in its own wire
//! format. Failures left untranslated are rendered by [`Failure`]'s
//! `IntoResponse` impl at the edge.

use axum::extract::Request;
use futures_util::future::BoxFuture;

use crate::http::middleware::pipeline::{Interceptor, Next};
use crate::http::response::{Failure, Outcome};

pub trait ErrorTranslator: Send + Sync {
    /// Return `Ok` with a rendered response, or `Err` to leave it to the edge.
    fn translate(&self, failure: Failure) -> Outcome;
}

impl<F> ErrorTranslator for F
where
    F: Fn(Failure) -> Outcome + Send + Sync,
{
    fn translate(&self, failure: Failure) -> Outcome {
        self(failure)
    }
}

pub struct ErrorTranslation<T> {
    translator: T,
}

impl<T: ErrorTranslator> ErrorTranslation<T> {
    pub fn new(translator: T) -> Self {
        Self { translator }
    }
}

impl<T: ErrorTranslator> Interceptor for ErrorTranslation<T> {
    fn intercept<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            match next.run(req).await {
                Ok(response) => Ok(response),
                Err(failure) => self.translator.translate(failure),
            }
        })
    }
}
