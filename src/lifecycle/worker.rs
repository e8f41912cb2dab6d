//! Background worker lifecycle.
//!
//! # Responsibilities
//! - Run one long-lived task on its own tokio task with its own cancellation token
//! - Optionally hold the task body until the service is ready / traffic-ready
//! - Escalate a fatal task error into a process shutdown when asked to
//! - Stop cooperatively, bounded by the caller's scope
//!
//! # Design Decisions
//! - The body receives a token, not a scope: workers run until told to stop
//! - A panic in the body is reported like an error
//! - State is a watch channel so callers can observe it without locking

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::cancel::{CancelCause, CancelScope};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::readiness::ReadinessCoordinator;
use crate::BoxError;

type WorkerFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Exit code requested when a fatal worker error is escalated.
pub const FATAL_EXIT_CODE: i32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Hold the body until every readiness component is ready.
    pub wait_for_readiness: bool,
    /// Hold the body until traffic readiness is recorded.
    pub wait_for_traffic_ready: bool,
    /// Request process shutdown if the body fails.
    pub escalate_on_fatal_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started, or started and held by a readiness precondition.
    Idle,
    /// The body is executing.
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker '{0}' is already running")]
    AlreadyRunning(String),
    #[error("worker '{0}' waits for readiness but has no readiness coordinator")]
    MissingReadiness(String),
    #[error("worker '{0}' escalates fatal errors but has no shutdown handle")]
    MissingShutdown(String),
    #[error("stopping worker '{name}' gave up: {cause}")]
    StopAbandoned { name: String, cause: CancelCause },
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// One managed background task.
pub struct Worker {
    name: Arc<str>,
    run: WorkerFn,
    options: WorkerOptions,
    readiness: Option<ReadinessCoordinator>,
    shutdown: Option<Shutdown>,
    state: Arc<watch::Sender<WorkerState>>,
    task: Mutex<Option<Running>>,
}

impl Worker {
    pub fn new<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            name: Arc::from(name.into()),
            run: Arc::new(move |token: CancellationToken| run(token).boxed()),
            options: WorkerOptions::default(),
            readiness: None,
            shutdown: None,
            state: Arc::new(state),
            task: Mutex::new(None),
        }
    }

    pub fn with_options(mut self, options: WorkerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessCoordinator) -> Self {
        self.readiness = Some(readiness);
        self
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Fail if the options need a collaborator the worker was not given.
    pub fn check_collaborators(&self) -> Result<(), WorkerError> {
        let waits = self.options.wait_for_readiness || self.options.wait_for_traffic_ready;
        if waits && self.readiness.is_none() {
            return Err(WorkerError::MissingReadiness(self.name.to_string()));
        }
        if self.options.escalate_on_fatal_error && self.shutdown.is_none() {
            return Err(WorkerError::MissingShutdown(self.name.to_string()));
        }
        Ok(())
    }

    /// Launch the task and return immediately.
    pub fn start(&self) -> Result<(), WorkerError> {
        self.check_collaborators()?;

        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|running| !running.handle.is_finished()) {
            return Err(WorkerError::AlreadyRunning(self.name.to_string()));
        }

        let token = CancellationToken::new();
        self.state.send_replace(WorkerState::Idle);
        let handle = tokio::spawn(
            Lifecycle {
                name: Arc::clone(&self.name),
                run: Arc::clone(&self.run),
                options: self.options,
                readiness: self.readiness.clone(),
                shutdown: self.shutdown.clone(),
                state: Arc::clone(&self.state),
            }
            .drive(token.clone()),
        );
        *task = Some(Running { token, handle });
        tracing::debug!(worker = %self.name, "Worker started");
        Ok(())
    }

    /// Cancel the task and wait for it to finish or for `scope` to end.
    ///
    /// A no-op on a worker that was never started.
    pub async fn stop(&self, scope: &CancelScope) -> Result<(), WorkerError> {
        let running = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut running) = running else {
            return Ok(());
        };

        running.token.cancel();
        if !running.handle.is_finished() {
            self.state.send_if_modified(|state| {
                if matches!(*state, WorkerState::Idle | WorkerState::Running) {
                    *state = WorkerState::Stopping;
                    true
                } else {
                    false
                }
            });
        }

        tokio::select! {
            _ = &mut running.handle => Ok(()),
            cause = scope.cancelled() => {
                tracing::warn!(worker = %self.name, cause = %cause, "Worker did not stop in time");
                let name = self.name.to_string();
                // Keep the handle so a later stop can still wait for it.
                *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(running);
                Err(WorkerError::StopAbandoned { name, cause })
            }
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("state", &self.state())
            .finish()
    }
}

/// Everything the spawned task needs, detached from `&Worker`.
struct Lifecycle {
    name: Arc<str>,
    run: WorkerFn,
    options: WorkerOptions,
    readiness: Option<ReadinessCoordinator>,
    shutdown: Option<Shutdown>,
    state: Arc<watch::Sender<WorkerState>>,
}

impl Lifecycle {
    async fn drive(self, token: CancellationToken) {
        let outcome = if self.preconditions_met(&token).await {
            self.run_body(token).await
        } else {
            "cancelled_before_start"
        };
        metrics::record_worker_exit(&self.name, outcome);
        self.state.send_replace(WorkerState::Stopped);
    }

    async fn preconditions_met(&self, token: &CancellationToken) -> bool {
        let Some(readiness) = &self.readiness else {
            return true;
        };
        let scope = CancelScope::from_token(token.clone());

        if self.options.wait_for_readiness {
            if let Err(e) = readiness.wait_ready(&scope).await {
                tracing::debug!(worker = %self.name, error = %e, "Stopped while waiting for readiness");
                return false;
            }
        }
        if self.options.wait_for_traffic_ready {
            if let Err(e) = readiness.wait_traffic_ready(&scope).await {
                tracing::debug!(worker = %self.name, error = %e, "Stopped while waiting for traffic readiness");
                return false;
            }
        }
        true
    }

    async fn run_body(&self, token: CancellationToken) -> &'static str {
        self.state.send_if_modified(|state| {
            if *state == WorkerState::Idle {
                *state = WorkerState::Running;
                true
            } else {
                false
            }
        });
        tracing::info!(worker = %self.name, "Worker running");
        let result = match AssertUnwindSafe((self.run)(token)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err("worker panicked".into()),
        };

        match result {
            Ok(()) => {
                tracing::info!(worker = %self.name, "Worker finished");
                "ok"
            }
            Err(e) if self.options.escalate_on_fatal_error => {
                tracing::error!(worker = %self.name, error = %e, "Worker failed, requesting shutdown");
                if let Some(shutdown) = &self.shutdown {
                    shutdown.request(FATAL_EXIT_CODE);
                }
                "escalated"
            }
            Err(e) => {
                tracing::error!(worker = %self.name, error = %e, "Worker failed");
                "failed"
            }
        }
    }
}
