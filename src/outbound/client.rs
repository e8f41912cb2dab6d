//! Resilient outbound HTTP client.
//!
//! A hyper-util pooled client whose connections are lifetime-bounded, behind
//! a retry wrapper and an overall request timeout.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use futures_util::future::BoxFuture;
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};

use crate::config::OutboundConfig;
use crate::lifecycle::cancel::CancelScope;
use crate::outbound::connector::LifetimeConnector;
use crate::outbound::retry::{RetryPolicy, RetryTransport, Transport};
use crate::outbound::OutboundError;
use crate::BoxError;

type PooledClient = Client<LifetimeConnector<HttpConnector>, Body>;

#[derive(Debug, Clone, Copy)]
struct PoolSettings {
    max_idle_per_host: usize,
    idle_timeout: Duration,
    max_lifetime: Duration,
}

impl PoolSettings {
    fn build(&self) -> PooledClient {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        Client::builder(TokioExecutor::new())
            .pool_idle_timeout(self.idle_timeout)
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_timer(TokioTimer::new())
            .build(LifetimeConnector::new(http, self.max_lifetime))
    }
}

/// [`Transport`] over a hyper-util connection pool.
///
/// Closing idle connections swaps in a fresh pool. Requests in flight keep
/// the old pool alive until they finish; its idle connections are then dropped.
pub struct HyperTransport {
    client: ArcSwap<PooledClient>,
    settings: PoolSettings,
}

impl HyperTransport {
    fn new(settings: PoolSettings) -> Self {
        Self {
            client: ArcSwap::from_pointee(settings.build()),
            settings,
        }
    }
}

impl Transport for HyperTransport {
    fn round_trip(&self, req: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, BoxError>> {
        let client = self.client.load_full();
        Box::pin(async move {
            let response = client.request(req).await?;
            Ok(response.map(Body::new))
        })
    }

    fn close_idle_connections(&self) {
        self.client.store(Arc::new(self.settings.build()));
        tracing::debug!("Outbound connection pool replaced");
    }
}

/// HTTP client for calls to downstream services.
pub struct ResilientClient {
    transport: RetryTransport<HyperTransport>,
    timeout: Duration,
}

impl ResilientClient {
    pub fn new(config: &OutboundConfig) -> Self {
        let settings = PoolSettings {
            max_idle_per_host: config.max_idle_per_host,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_lifetime: Duration::from_secs(config.max_lifetime_secs),
        };
        Self {
            transport: RetryTransport::new(
                HyperTransport::new(settings),
                RetryPolicy::for_pool_size(config.max_idle_per_host),
            ),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.transport.policy()
    }

    /// Send `req`, retrying transient failures, within the client timeout.
    pub async fn send(&self, req: Request<Body>) -> Result<Response<Body>, OutboundError> {
        tokio::time::timeout(self.timeout, self.transport.send(req))
            .await
            .map_err(|_| OutboundError::Timeout(self.timeout))?
    }

    /// Like [`send`](Self::send), but also gives up when `scope` ends.
    pub async fn send_scoped(
        &self,
        req: Request<Body>,
        scope: &CancelScope,
    ) -> Result<Response<Body>, OutboundError> {
        tokio::select! {
            result = self.send(req) => result,
            cause = scope.cancelled() => Err(OutboundError::Cancelled(cause)),
        }
    }

    pub async fn get(&self, uri: &str) -> Result<Response<Body>, OutboundError> {
        let req = Request::get(uri).body(Body::empty())?;
        self.send(req).await
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.transport.policy())
            .finish()
    }
}
