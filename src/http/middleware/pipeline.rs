//! Priority-ordered interceptor chain.
//!
//! # Data Flow
//! ```text
//! AdmissionPipeline::handle(req, endpoint)
//!     → stage[0].intercept(req, next)      (lowest priority, outermost)
//!         → next.run(req)
//!             → stage[1].intercept(...)
//!                 → ...
//!                     → endpoint.call(req)
//! ```
//!
//! Probe requests (see [`is_bypass_path`]) skip every stage whose
//! [`Interceptor::bypasses_probes`] returns true.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::middleware::admission::{BulkheadStage, CircuitBreakerStage, RateLimitStage};
use crate::http::middleware::logging::RequestLogging;
use crate::http::middleware::recovery::PanicRecovery;
use crate::http::middleware::timeout::RequestTimeout;
use crate::http::middleware::translation::{ErrorTranslation, ErrorTranslator};
use crate::http::middleware::validation::{RequestValidator, SchemaValidation};
use crate::http::response::Outcome;
use crate::resilience::{Bulkhead, CircuitBreaker, RateLimiter};

/// Liveness/readiness probe paths. They must always answer, whatever the load.
pub const PROBE_PATHS: [&str; 3] = ["/livez", "/readyz", "/healthz"];

/// True if `path` is a probe path or lives under one.
pub fn is_bypass_path(path: &str) -> bool {
    PROBE_PATHS.iter().any(|probe| {
        path.strip_prefix(probe)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

/// Canonical stage priorities. Lower runs first.
pub mod priority {
    pub const PANIC_RECOVERY: i32 = 0;
    pub const TIMEOUT: i32 = 10;
    pub const RATE_LIMIT: i32 = 20;
    pub const CIRCUIT_BREAKER: i32 = 30;
    pub const BULKHEAD: i32 = 40;
    pub const REQUEST_LOGGING: i32 = 50;
    pub const SCHEMA_VALIDATION: i32 = 60;
    pub const ERROR_TRANSLATION: i32 = 70;
}

/// The innermost handler.
pub trait Endpoint: Send + Sync {
    fn call(&self, req: Request) -> BoxFuture<'_, Outcome>;
}

impl<F, Fut> Endpoint for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Outcome> + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture<'_, Outcome> {
        self(req).boxed()
    }
}

/// One stage of the pipeline.
pub trait Interceptor: Send + Sync {
    fn intercept<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome>;

    /// Whether probe requests skip this stage.
    fn bypasses_probes(&self) -> bool {
        false
    }
}

/// The rest of the chain after the current stage.
pub struct Next<'a> {
    stages: &'a [Stage],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn run(self, req: Request) -> BoxFuture<'a, Outcome> {
        let probe = is_bypass_path(req.uri().path());
        let mut stages = self.stages;
        while let Some((stage, rest)) = stages.split_first() {
            if probe && stage.interceptor.bypasses_probes() {
                stages = rest;
                continue;
            }
            return stage.interceptor.intercept(
                req,
                Next {
                    stages: rest,
                    endpoint: self.endpoint,
                },
            );
        }
        self.endpoint.call(req)
    }
}

#[derive(Clone)]
struct Stage {
    priority: i32,
    name: &'static str,
    interceptor: Arc<dyn Interceptor>,
}

/// Collects stages, then sorts them once.
#[derive(Default)]
pub struct AdmissionPipelineBuilder {
    stages: Vec<Stage>,
}

impl AdmissionPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage. `None` is a disabled stage and is dropped.
    ///
    /// Stages with equal priority keep insertion order.
    pub fn stage(
        mut self,
        priority: i32,
        name: &'static str,
        interceptor: Option<Arc<dyn Interceptor>>,
    ) -> Self {
        if let Some(interceptor) = interceptor {
            self.stages.push(Stage {
                priority,
                name,
                interceptor,
            });
        }
        self
    }

    pub fn recover_panics(self) -> Self {
        self.stage(
            priority::PANIC_RECOVERY,
            "panic_recovery",
            Some(Arc::new(PanicRecovery)),
        )
    }

    pub fn timeout(self, timeout: Option<Duration>) -> Self {
        self.stage(
            priority::TIMEOUT,
            "timeout",
            timeout.map(|t| Arc::new(RequestTimeout::new(t)) as Arc<dyn Interceptor>),
        )
    }

    pub fn rate_limiter(self, limiter: Option<Arc<RateLimiter>>) -> Self {
        self.stage(
            priority::RATE_LIMIT,
            "rate_limit",
            limiter.map(|l| Arc::new(RateLimitStage::new(l)) as Arc<dyn Interceptor>),
        )
    }

    pub fn circuit_breaker(self, breaker: Option<Arc<CircuitBreaker>>) -> Self {
        self.stage(
            priority::CIRCUIT_BREAKER,
            "circuit_breaker",
            breaker.map(|b| Arc::new(CircuitBreakerStage::new(b)) as Arc<dyn Interceptor>),
        )
    }

    pub fn bulkhead(self, bulkhead: Option<Arc<Bulkhead>>) -> Self {
        self.stage(
            priority::BULKHEAD,
            "bulkhead",
            bulkhead.map(|b| Arc::new(BulkheadStage::new(b)) as Arc<dyn Interceptor>),
        )
    }

    pub fn request_logging(self) -> Self {
        self.stage(
            priority::REQUEST_LOGGING,
            "request_logging",
            Some(Arc::new(RequestLogging)),
        )
    }

    pub fn schema_validation<V: RequestValidator + 'static>(self, validator: Option<V>) -> Self {
        self.stage(
            priority::SCHEMA_VALIDATION,
            "schema_validation",
            validator.map(|v| Arc::new(SchemaValidation::new(v)) as Arc<dyn Interceptor>),
        )
    }

    pub fn error_translation<T: ErrorTranslator + 'static>(self, translator: Option<T>) -> Self {
        self.stage(
            priority::ERROR_TRANSLATION,
            "error_translation",
            translator.map(|t| Arc::new(ErrorTranslation::new(t)) as Arc<dyn Interceptor>),
        )
    }

    pub fn build(mut self) -> AdmissionPipeline {
        // Vec::sort_by_key is stable.
        self.stages.sort_by_key(|stage| stage.priority);
        AdmissionPipeline {
            stages: self.stages.into(),
        }
    }
}

/// An immutable, sorted chain of stages. Cheap to clone.
#[derive(Clone, Default)]
pub struct AdmissionPipeline {
    stages: Arc<[Stage]>,
}

impl AdmissionPipeline {
    pub fn builder() -> AdmissionPipelineBuilder {
        AdmissionPipelineBuilder::new()
    }

    /// Run `req` through every stage and then `endpoint`.
    pub fn handle<'a>(&'a self, req: Request, endpoint: &'a dyn Endpoint) -> BoxFuture<'a, Outcome> {
        Next {
            stages: &self.stages,
            endpoint,
        }
        .run(req)
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for AdmissionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use axum::response::{IntoResponse, Response};
    use std::sync::Mutex;

    /// Records its tag in the shared log when it runs.
    struct Tag {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        bypass: bool,
    }

    impl Interceptor for Tag {
        fn intercept<'a>(&'a self, req: Request, next: Next<'a>) -> BoxFuture<'a, Outcome> {
            Box::pin(async move {
                self.log.lock().unwrap().push(self.tag);
                next.run(req).await
            })
        }

        fn bypasses_probes(&self) -> bool {
            self.bypass
        }
    }

    fn tag(
        tag: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        bypass: bool,
    ) -> Option<Arc<dyn Interceptor>> {
        Some(Arc::new(Tag {
            tag,
            log: Arc::clone(log),
            bypass,
        }))
    }

    async fn ok(_req: Request) -> Outcome {
        let mut response: Response = StatusCode::OK.into_response();
        response
            .headers_mut()
            .insert("x-handled", HeaderValue::from_static("yes"));
        Ok(response)
    }

    fn request(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn stages_run_in_priority_order_and_skip_disabled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = AdmissionPipeline::builder()
            .stage(30, "c", tag("c", &log, false))
            .stage(10, "a", tag("a", &log, false))
            .stage(20, "disabled", None)
            .stage(10, "b", tag("b", &log, false))
            .build();

        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c"]);

        let response = pipeline.handle(request("/work"), &ok).await.unwrap();
        assert_eq!(response.headers()["x-handled"], "yes");
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn probes_skip_bypassable_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = AdmissionPipeline::builder()
            .stage(0, "always", tag("always", &log, false))
            .stage(10, "gate", tag("gate", &log, true))
            .build();

        pipeline.handle(request("/readyz"), &ok).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["always"]);

        log.lock().unwrap().clear();
        pipeline.handle(request("/orders"), &ok).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["always", "gate"]);
    }

    #[test]
    fn canonical_order_regardless_of_registration_order() {
        let pipeline = AdmissionPipeline::builder()
            .request_logging()
            .bulkhead(Some(Arc::new(Bulkhead::new(4, Duration::from_millis(10)))))
            .circuit_breaker(None)
            .rate_limiter(Some(Arc::new(RateLimiter::new(10.0, 10))))
            .timeout(Some(Duration::from_secs(1)))
            .recover_panics()
            .build();

        assert_eq!(
            pipeline.stage_names(),
            vec!["panic_recovery", "timeout", "rate_limit", "bulkhead", "request_logging"]
        );
    }

    #[test]
    fn bypass_matches_exact_or_prefix_segment() {
        assert!(is_bypass_path("/livez"));
        assert!(is_bypass_path("/readyz"));
        assert!(is_bypass_path("/healthz/deep"));
        assert!(!is_bypass_path("/readyzz"));
        assert!(!is_bypass_path("/api/readyz"));
        assert!(!is_bypass_path("/"));
    }
}
