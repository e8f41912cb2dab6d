//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration before anything else
//! - Build the admission primitives and the pipeline
//! - Bind the listener, register the server with readiness, start workers
//! - Serve until shutdown, drain, stop workers, report the exit code
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The server reports ready only once its listener is bound

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::{validate_config, AdmissionConfig, RuntimeConfig, ValidationError};
use crate::http::middleware::AdmissionPipeline;
use crate::http::HttpServer;
use crate::lifecycle::cancel::CancelScope;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::worker::{Worker, WorkerError, FATAL_EXIT_CODE};
use crate::observability::metrics;
use crate::readiness::{ReadinessCoordinator, ReadinessError};
use crate::resilience::{Bulkhead, CircuitBreaker, RateLimiter};
use crate::BoxError;

/// Readiness component name of the HTTP listener.
pub const HTTP_SERVER_COMPONENT: &str = "http-server";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))]
    InvalidConfig(Vec<ValidationError>),
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// The admission primitives a pipeline was built from, for inspection.
#[derive(Debug, Clone, Default)]
pub struct AdmissionGates {
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub bulkhead: Option<Arc<Bulkhead>>,
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl AdmissionGates {
    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            rate_limiter: config
                .rate_limit
                .enabled
                .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit))),
            bulkhead: config
                .bulkhead
                .enabled
                .then(|| Arc::new(Bulkhead::from_config(&config.bulkhead))),
            circuit_breaker: config
                .circuit_breaker
                .enabled
                .then(|| Arc::new(CircuitBreaker::from_config(&config.circuit_breaker))),
        }
    }

    /// The canonical pipeline over these gates.
    pub fn pipeline(&self, config: &AdmissionConfig) -> AdmissionPipeline {
        let mut builder = AdmissionPipeline::builder();
        if config.recover_panics {
            builder = builder.recover_panics();
        }
        builder
            .timeout(
                (config.request_timeout_ms > 0)
                    .then(|| Duration::from_millis(config.request_timeout_ms)),
            )
            .rate_limiter(self.rate_limiter.clone())
            .circuit_breaker(self.circuit_breaker.clone())
            .bulkhead(self.bulkhead.clone())
            .request_logging()
            .build()
    }
}

/// Wires a service together from validated configuration.
pub struct Bootstrap {
    config: RuntimeConfig,
    readiness: ReadinessCoordinator,
    shutdown: Shutdown,
    gates: AdmissionGates,
    pipeline: AdmissionPipeline,
    routes: Router,
    workers: Vec<Worker>,
}

impl Bootstrap {
    /// Validate `config` and build the admission pipeline.
    pub fn new(config: RuntimeConfig) -> Result<Self, StartupError> {
        validate_config(&config).map_err(StartupError::InvalidConfig)?;

        let gates = AdmissionGates::from_config(&config.admission);
        let pipeline = gates.pipeline(&config.admission);
        tracing::info!(stages = ?pipeline.stage_names(), "Admission pipeline built");

        Ok(Self {
            readiness: ReadinessCoordinator::new(config.readiness.traffic_mode),
            shutdown: Shutdown::new(),
            gates,
            pipeline,
            routes: Router::new(),
            workers: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn readiness(&self) -> &ReadinessCoordinator {
        &self.readiness
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    pub fn gates(&self) -> &AdmissionGates {
        &self.gates
    }

    /// Replace the default pipeline, e.g. to add validation or translation stages.
    pub fn with_pipeline(mut self, pipeline: AdmissionPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Add the service's routes (state already applied).
    pub fn with_routes(mut self, routes: Router) -> Self {
        self.routes = self.routes.merge(routes);
        self
    }

    /// A worker already wired to this service's readiness and shutdown.
    pub fn worker<F, Fut>(&self, name: impl Into<String>, run: F) -> Worker
    where
        F: Fn(tokio_util::sync::CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Worker::new(name, run)
            .with_readiness(self.readiness.clone())
            .with_shutdown(self.shutdown.clone())
    }

    pub fn with_worker(mut self, worker: Worker) -> Self {
        self.workers.push(worker);
        self
    }

    /// Bind the configured address and serve. Returns the process exit code.
    pub async fn run(self) -> Result<i32, StartupError> {
        let address = self.config.listener.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;
        self.run_on(listener).await
    }

    /// Serve on an already bound listener. Returns the process exit code.
    pub async fn run_on(self, listener: TcpListener) -> Result<i32, StartupError> {
        for worker in &self.workers {
            worker.check_collaborators()?;
        }

        let observability = &self.config.observability;
        if observability.metrics_enabled {
            // Validation guarantees the address parses.
            if let Ok(addr) = observability.metrics_address.parse() {
                metrics::init_metrics(addr)?;
            }
        }

        self.readiness.add_component(HTTP_SERVER_COMPONENT)?;
        let drain_timeout = Duration::from_secs(self.config.listener.drain_timeout_secs);
        let server = HttpServer::new(
            self.routes,
            self.pipeline,
            self.readiness.clone(),
            drain_timeout,
        );

        let signals = spawn_signal_handler(self.shutdown.clone());
        for (started, worker) in self.workers.iter().enumerate() {
            if let Err(e) = worker.start() {
                tracing::error!(worker = worker.name(), error = %e, "Worker failed to start");
                self.shutdown.request(FATAL_EXIT_CODE);
                stop_workers(&self.workers[..started], drain_timeout).await;
                signals.abort();
                return Err(e.into());
            }
        }

        self.readiness.mark_ready(HTTP_SERVER_COMPONENT)?;
        let served = server.run(listener, self.shutdown.token()).await;
        if served.is_err() {
            self.shutdown.request(FATAL_EXIT_CODE);
        }

        stop_workers(&self.workers, drain_timeout).await;
        signals.abort();

        served.map_err(StartupError::Serve)?;
        let exit_code = self.shutdown.exit_code().unwrap_or(0);
        tracing::info!(exit_code, "Shutdown complete");
        Ok(exit_code)
    }
}

/// Stop `workers` under one shared deadline.
async fn stop_workers(workers: &[Worker], timeout: Duration) {
    let scope = CancelScope::with_timeout(timeout);
    for worker in workers {
        if let Err(e) = worker.stop(&scope).await {
            tracing::warn!(error = %e, "Worker stop abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::worker::{WorkerOptions, WorkerState};

    fn test_bootstrap() -> Bootstrap {
        let mut config = RuntimeConfig::default();
        config.listener.drain_timeout_secs = 1;
        Bootstrap::new(config).unwrap()
    }

    fn idle_worker(bootstrap: &Bootstrap, name: &str) -> Worker {
        bootstrap.worker(name, |token| async move {
            token.cancelled().await;
            Ok::<(), BoxError>(())
        })
    }

    #[tokio::test]
    async fn misconfigured_worker_fails_before_any_worker_starts() {
        let bootstrap = test_bootstrap();
        let good = idle_worker(&bootstrap, "good");
        let mut state = good.watch_state();
        let bad = Worker::new("bad", |_token| async { Ok::<(), BoxError>(()) }).with_options(
            WorkerOptions {
                escalate_on_fatal_error: true,
                ..WorkerOptions::default()
            },
        );
        let readiness = bootstrap.readiness().clone();
        let bootstrap = bootstrap.with_worker(good).with_worker(bad);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = bootstrap.run_on(listener).await;

        assert!(matches!(
            result,
            Err(StartupError::Worker(WorkerError::MissingShutdown(_)))
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*state.borrow_and_update(), WorkerState::Idle);
        assert!(readiness.component(HTTP_SERVER_COMPONENT).is_none());
    }

    #[tokio::test]
    async fn failed_start_stops_workers_already_started() {
        let bootstrap = test_bootstrap();
        let first = idle_worker(&bootstrap, "first");
        let mut first_state = first.watch_state();
        let second = idle_worker(&bootstrap, "second");
        second.start().unwrap();
        let shutdown = bootstrap.shutdown().clone();
        let bootstrap = bootstrap.with_worker(first).with_worker(second);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = bootstrap.run_on(listener).await;

        assert!(matches!(
            result,
            Err(StartupError::Worker(WorkerError::AlreadyRunning(_)))
        ));
        assert_eq!(*first_state.borrow_and_update(), WorkerState::Stopped);
        assert_eq!(shutdown.exit_code(), Some(FATAL_EXIT_CODE));
    }

    #[test]
    fn invalid_config_fails_fast() {
        let mut config = RuntimeConfig::default();
        config.admission.bulkhead.enabled = true;
        config.admission.bulkhead.max_concurrent = 0;
        assert!(matches!(
            Bootstrap::new(config),
            Err(StartupError::InvalidConfig(_))
        ));
    }

    #[test]
    fn pipeline_follows_enabled_gates() {
        let mut config = RuntimeConfig::default();
        config.admission.rate_limit.enabled = true;
        config.admission.circuit_breaker.enabled = true;

        let bootstrap = Bootstrap::new(config).unwrap();
        assert!(bootstrap.gates().bulkhead.is_none());
        assert_eq!(
            bootstrap.pipeline.stage_names(),
            vec![
                "panic_recovery",
                "timeout",
                "rate_limit",
                "circuit_breaker",
                "request_logging"
            ]
        );
    }
}
