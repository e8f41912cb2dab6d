//! Cancellation scopes.
//!
//! A [`CancelScope`] pairs a cancellation token with an optional deadline. Every
//! suspension point in the runtime (readiness waits, bulkhead acquire, worker stop)
//! takes one and reports *why* it gave up through [`CancelCause`].

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a scope ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CancelCause {
    /// The scope's token (or one of its parents) was cancelled.
    #[error("operation cancelled")]
    Cancelled,
    /// The scope's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation token plus optional deadline.
///
/// Scopes form a tree: cancelling a parent cancels every child, and a child's
/// deadline is never later than its parent's.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelScope {
    /// Create a new root scope with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Create a root scope that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().child_with_timeout(timeout)
    }

    /// Derive a child scope. Cancelling the child does not affect `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child scope bounded by `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Cancel this scope and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// The underlying token, for APIs that only understand tokens.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check: the cause if the scope has already ended.
    pub fn cause(&self) -> Option<CancelCause> {
        if self.token.is_cancelled() {
            return Some(CancelCause::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve when the scope ends, yielding the cause.
    pub async fn cancelled(&self) -> CancelCause {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => CancelCause::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => CancelCause::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                CancelCause::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn deadline_reports_deadline_exceeded() {
        let scope = CancelScope::with_timeout(Duration::from_millis(50));
        assert_eq!(scope.cause(), None);
        assert_eq!(scope.cancelled().await, CancelCause::DeadlineExceeded);
        assert_eq!(scope.cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[tokio::test]
    async fn parent_cancel_reaches_child() {
        let parent = CancelScope::new();
        let child = parent.child_with_timeout(Duration::from_secs(60));
        parent.cancel();
        assert_eq!(child.cancelled().await, CancelCause::Cancelled);
    }

    #[test]
    fn child_deadline_never_outlives_parent() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let parent = CancelScope::with_timeout(Duration::from_millis(10));
            let child = parent.child_with_timeout(Duration::from_secs(10));
            assert_eq!(child.deadline(), parent.deadline());
        });
    }
}
