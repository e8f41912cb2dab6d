//! Shutdown coordination for the process.

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::lifecycle::cancel::CancelScope;

struct Inner {
    token: CancellationToken,
    exit_code: OnceLock<i32>,
}

/// Coordinator for graceful shutdown.
///
/// Holds the process-wide root cancellation token. Every long-running task
/// derives its own scope from it. The first requested exit code wins.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                exit_code: OnceLock::new(),
            }),
        }
    }

    /// A child token that fires when shutdown is requested.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// A child scope that ends when shutdown is requested.
    pub fn scope(&self) -> CancelScope {
        CancelScope::from_token(self.token())
    }

    /// Request a clean shutdown (exit code 0).
    pub fn trigger(&self) {
        self.request(0);
    }

    /// Request shutdown with `exit_code`. Later requests keep the first code.
    pub fn request(&self, exit_code: i32) {
        if self.inner.exit_code.set(exit_code).is_ok() {
            if exit_code == 0 {
                tracing::info!("Shutdown requested");
            } else {
                tracing::warn!(exit_code, "Shutdown requested after fatal error");
            }
        }
        self.inner.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait(&self) {
        self.inner.token.cancelled().await;
    }

    /// The exit code of the first request, if any.
    pub fn exit_code(&self) -> Option<i32> {
        self.inner.exit_code.get().copied()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_exit_code_wins() {
        let shutdown = Shutdown::new();
        let token = shutdown.token();
        assert!(!token.is_cancelled());

        shutdown.request(1);
        shutdown.trigger();

        assert!(token.is_cancelled());
        assert_eq!(shutdown.exit_code(), Some(1));
        shutdown.wait().await;
    }

    #[tokio::test]
    async fn scopes_end_on_shutdown() {
        let shutdown = Shutdown::new();
        let scope = shutdown.scope();
        let clone = shutdown.clone();
        tokio::spawn(async move { clone.trigger() });
        assert_eq!(
            scope.cancelled().await,
            crate::lifecycle::cancel::CancelCause::Cancelled
        );
        assert_eq!(shutdown.exit_code(), Some(0));
    }
}
