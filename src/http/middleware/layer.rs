//! Tower integration for the admission pipeline.
//!
//! `Router::new().route(...).layer(AdmissionLayer::new(pipeline))` runs every
//! routed request through the pipeline; the router becomes the endpoint.

use std::convert::Infallible;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::{Layer, Service, ServiceExt};

use crate::http::middleware::pipeline::{AdmissionPipeline, Endpoint};
use crate::http::response::{into_response, Outcome};

#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    pipeline: AdmissionPipeline,
}

impl AdmissionLayer {
    pub fn new(pipeline: AdmissionPipeline) -> Self {
        Self { pipeline }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            pipeline: self.pipeline.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionService<S> {
    inner: S,
    pipeline: AdmissionPipeline,
}

impl<S> Service<Request> for AdmissionService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Readiness is checked per call by `oneshot`.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let pipeline = self.pipeline.clone();
        let endpoint = ServiceEndpoint {
            inner: self.inner.clone(),
        };
        Box::pin(async move {
            let outcome = pipeline.handle(req, &endpoint).await;
            Ok(into_response(outcome))
        })
    }
}

/// Adapts an infallible tower service into the pipeline's endpoint.
struct ServiceEndpoint<S> {
    inner: S,
}

impl<S> Endpoint for ServiceEndpoint<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'_, Outcome> {
        let service = self.inner.clone();
        Box::pin(async move {
            match service.oneshot(req).await {
                Ok(response) => Ok(response),
                Err(never) => match never {},
            }
        })
    }
}
