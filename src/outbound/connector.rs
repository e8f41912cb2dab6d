//! Connector that wraps every dialed connection in a [`PooledConnection`].

use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::BoxFuture;
use hyper::Uri;
use tower::Service;

use crate::outbound::connection::PooledConnection;
use crate::BoxError;

#[derive(Debug, Clone)]
pub struct LifetimeConnector<C> {
    inner: C,
    max_lifetime: Duration,
}

impl<C> LifetimeConnector<C> {
    pub fn new(inner: C, max_lifetime: Duration) -> Self {
        Self {
            inner,
            max_lifetime,
        }
    }
}

impl<C> Service<Uri> for LifetimeConnector<C>
where
    C: Service<Uri>,
    C::Response: Send + 'static,
    C::Future: Send + 'static,
    C::Error: Into<BoxError>,
{
    type Response = PooledConnection<C::Response>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let max_lifetime = self.max_lifetime;
        let connecting = self.inner.call(uri);
        Box::pin(async move {
            let conn = connecting.await.map_err(Into::into)?;
            Ok(PooledConnection::new(conn, max_lifetime))
        })
    }
}
