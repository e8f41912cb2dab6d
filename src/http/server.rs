//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Combine the service's routes with the probe routes
//! - Wrap everything in the admission pipeline and request tracing
//! - Bind server to listener
//! - Drain in-flight requests at shutdown, bounded by the drain timeout

use std::future::IntoFuture;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::http::middleware::{AdmissionLayer, AdmissionPipeline};
use crate::http::probes;
use crate::readiness::ReadinessCoordinator;

/// HTTP server for a service built on the runtime.
pub struct HttpServer {
    router: Router,
    drain_timeout: Duration,
}

impl HttpServer {
    /// `app` carries the service's own routes, with state already applied.
    pub fn new(
        app: Router,
        pipeline: AdmissionPipeline,
        readiness: ReadinessCoordinator,
        drain_timeout: Duration,
    ) -> Self {
        let router = Self::build_router(app, pipeline, readiness);
        Self {
            router,
            drain_timeout,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(
        app: Router,
        pipeline: AdmissionPipeline,
        readiness: ReadinessCoordinator,
    ) -> Router {
        app.merge(probes::router(readiness))
            .layer(AdmissionLayer::new(pipeline))
            .layer(TraceLayer::new_for_http())
    }

    /// The fully layered router, e.g. for driving it with `oneshot` in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then drain.
    ///
    /// New connections stop being accepted as soon as `shutdown` fires; open
    /// requests get up to the drain timeout to finish.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let serve = axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => {
                tracing::info!("HTTP server stopped");
                return result;
            }
            _ = shutdown.cancelled() => {}
        }

        tracing::info!(
            drain_timeout_secs = self.drain_timeout.as_secs(),
            "Draining in-flight requests"
        );
        match tokio::time::timeout(self.drain_timeout, serve).await {
            Ok(result) => result?,
            Err(_) => tracing::warn!(
                drain_timeout_secs = self.drain_timeout.as_secs(),
                "Drain timeout elapsed, abandoning open connections"
            ),
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
