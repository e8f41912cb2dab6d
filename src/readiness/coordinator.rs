//! Component readiness tracking.
//!
//! # Responsibilities
//! - Register named components and record when each becomes ready
//! - Fire the process-wide "all-ready" signal exactly once
//! - Track traffic readiness according to the configured [`TrafficMode`]
//! - Release every waiter together when a signal fires

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::lifecycle::cancel::{CancelCause, CancelScope};
use crate::readiness::status::{ComponentStatus, ReadinessStatus};

/// How traffic readiness relates to component readiness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficMode {
    /// Traffic-ready as soon as every component is ready.
    #[default]
    Standalone,
    /// Traffic-ready only after an external notification, e.g. a successful
    /// orchestrator readiness probe, received after all components are ready.
    Orchestrated,
}

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("component name must not be empty")]
    EmptyName,
    #[error("unknown component: {0}")]
    UnknownComponent(String),
    #[error("traffic readiness requires all components to be ready")]
    NotReady,
    #[error(transparent)]
    Cancelled(#[from] CancelCause),
}

struct Inner {
    mode: TrafficMode,
    components: RwLock<BTreeMap<String, ComponentStatus>>,
    /// `Some(at)` once every component is ready. Never reset.
    all_ready: watch::Sender<Option<DateTime<Utc>>>,
    /// `Some(at)` once traffic readiness has been recorded. Never reset.
    traffic_ready: watch::Sender<Option<DateTime<Utc>>>,
}

/// Shared readiness registry. Cheap to clone.
#[derive(Clone)]
pub struct ReadinessCoordinator {
    inner: Arc<Inner>,
}

impl ReadinessCoordinator {
    pub fn new(mode: TrafficMode) -> Self {
        let (all_ready, _) = watch::channel(None);
        let (traffic_ready, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                mode,
                components: RwLock::new(BTreeMap::new()),
                all_ready,
                traffic_ready,
            }),
        }
    }

    pub fn mode(&self) -> TrafficMode {
        self.inner.mode
    }

    /// Register a component. Duplicate registrations are logged and ignored.
    pub fn add_component(&self, name: &str) -> Result<(), ReadinessError> {
        if name.is_empty() {
            return Err(ReadinessError::EmptyName);
        }

        let mut components = self
            .inner
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if components.contains_key(name) {
            tracing::warn!(component = %name, "Component already registered, ignoring");
            return Ok(());
        }

        if self.inner.all_ready.borrow().is_some() {
            tracing::warn!(
                component = %name,
                "Component registered after all-ready fired; readiness will not revert"
            );
        }

        components.insert(
            name.to_string(),
            ComponentStatus {
                name: name.to_string(),
                ready: false,
                started_at: Utc::now(),
                ready_at: None,
            },
        );
        tracing::debug!(component = %name, "Component registered");
        Ok(())
    }

    /// Mark a component ready. Re-marking keeps the first `ready_at`.
    pub fn mark_ready(&self, name: &str) -> Result<(), ReadinessError> {
        let mut components = self
            .inner
            .components
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let component = components
            .get_mut(name)
            .ok_or_else(|| ReadinessError::UnknownComponent(name.to_string()))?;

        if component.ready {
            return Ok(());
        }

        let now = Utc::now();
        component.ready = true;
        component.ready_at = Some(now);
        tracing::info!(component = %name, "Component ready");

        // Evaluated under the write lock so the aggregate is linearizable with
        // registrations and other mark-ready calls.
        if components.values().all(|c| c.ready) {
            let fired = self.inner.all_ready.send_if_modified(|at| {
                if at.is_none() {
                    *at = Some(now);
                    true
                } else {
                    false
                }
            });
            if fired {
                tracing::info!(components = components.len(), "All components ready");
                if self.inner.mode == TrafficMode::Standalone {
                    self.record_traffic_ready(now);
                }
            }
        }

        Ok(())
    }

    /// Non-blocking: true once every registered component has been ready.
    pub fn is_ready(&self) -> bool {
        self.inner.all_ready.borrow().is_some()
    }

    /// Non-blocking: true once traffic readiness has been recorded.
    pub fn is_traffic_ready(&self) -> bool {
        self.inner.traffic_ready.borrow().is_some()
    }

    /// Record the external traffic-ready notification.
    ///
    /// In standalone mode this is a no-op. In orchestrated mode it fails until all
    /// components are ready; the first successful call wins.
    pub fn notify_traffic_ready(&self) -> Result<(), ReadinessError> {
        if self.inner.mode == TrafficMode::Standalone {
            return Ok(());
        }
        if !self.is_ready() {
            return Err(ReadinessError::NotReady);
        }
        self.record_traffic_ready(Utc::now());
        Ok(())
    }

    fn record_traffic_ready(&self, at: DateTime<Utc>) {
        let recorded = self.inner.traffic_ready.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(at);
                true
            } else {
                false
            }
        });
        if recorded {
            tracing::info!(mode = ?self.inner.mode, "Traffic ready");
        }
    }

    /// Wait until every component is ready or `scope` ends.
    pub async fn wait_ready(&self, scope: &CancelScope) -> Result<(), ReadinessError> {
        Self::wait_signal(&self.inner.all_ready, scope).await
    }

    /// Wait until traffic readiness is recorded or `scope` ends.
    pub async fn wait_traffic_ready(&self, scope: &CancelScope) -> Result<(), ReadinessError> {
        Self::wait_signal(&self.inner.traffic_ready, scope).await
    }

    async fn wait_signal(
        signal: &watch::Sender<Option<DateTime<Utc>>>,
        scope: &CancelScope,
    ) -> Result<(), ReadinessError> {
        let mut rx = signal.subscribe();
        if rx.borrow_and_update().is_some() {
            return Ok(());
        }

        // The sender lives as long as `self`, so `wait_for` cannot observe a
        // closed channel while we hold `&self`.
        tokio::select! {
            biased;
            result = rx.wait_for(Option::is_some) => {
                result.map(|_| ()).map_err(|_| ReadinessError::Cancelled(CancelCause::Cancelled))
            }
            cause = scope.cancelled() => Err(ReadinessError::Cancelled(cause)),
        }
    }

    /// Look up one component.
    pub fn component(&self, name: &str) -> Option<ComponentStatus> {
        self.inner
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Coherent snapshot of the registry.
    pub fn status(&self) -> ReadinessStatus {
        let components = self
            .inner
            .components
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let ready = self.inner.all_ready.borrow().is_some();
        let traffic_notified_at = *self.inner.traffic_ready.borrow();
        let ready_at = components.values().filter_map(|c| c.ready_at).max();

        ReadinessStatus {
            ready,
            components: components.values().cloned().collect(),
            ready_at,
            traffic_notified_at,
        }
    }
}

impl Default for ReadinessCoordinator {
    fn default() -> Self {
        Self::new(TrafficMode::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_name_is_rejected() {
        let coordinator = ReadinessCoordinator::default();
        assert!(matches!(
            coordinator.add_component(""),
            Err(ReadinessError::EmptyName)
        ));
    }

    #[test]
    fn unknown_component_cannot_be_marked() {
        let coordinator = ReadinessCoordinator::default();
        assert!(matches!(
            coordinator.mark_ready("db"),
            Err(ReadinessError::UnknownComponent(name)) if name == "db"
        ));
    }

    #[test]
    fn duplicate_registration_keeps_original_timestamps() {
        let coordinator = ReadinessCoordinator::default();
        coordinator.add_component("db").unwrap();
        let first = coordinator.component("db").unwrap();
        coordinator.add_component("db").unwrap();
        assert_eq!(coordinator.component("db").unwrap(), first);
        assert_eq!(coordinator.status().components.len(), 1);
    }

    #[test]
    fn remarking_ready_preserves_first_ready_at() {
        let coordinator = ReadinessCoordinator::default();
        coordinator.add_component("db").unwrap();
        coordinator.mark_ready("db").unwrap();
        let first = coordinator.component("db").unwrap().ready_at;
        coordinator.mark_ready("db").unwrap();
        assert_eq!(coordinator.component("db").unwrap().ready_at, first);
    }

    #[test]
    fn ready_only_when_every_component_is_ready() {
        let coordinator = ReadinessCoordinator::default();
        coordinator.add_component("db").unwrap();
        coordinator.add_component("cache").unwrap();
        assert!(!coordinator.is_ready());

        coordinator.mark_ready("db").unwrap();
        assert!(!coordinator.is_ready());

        coordinator.mark_ready("cache").unwrap();
        assert!(coordinator.is_ready());

        // Monotonic: a late registration does not revert readiness.
        coordinator.add_component("late").unwrap();
        assert!(coordinator.is_ready());
    }

    #[test]
    fn status_is_sorted_and_reports_latest_ready_at() {
        let coordinator = ReadinessCoordinator::default();
        for name in ["zeta", "alpha", "mid"] {
            coordinator.add_component(name).unwrap();
        }
        for name in ["mid", "zeta", "alpha"] {
            coordinator.mark_ready(name).unwrap();
        }

        let status = coordinator.status();
        let names: Vec<_> = status.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        let latest = status.components.iter().filter_map(|c| c.ready_at).max();
        assert_eq!(status.ready_at, latest);
        assert!(status.ready);
        // Standalone: traffic readiness follows all-ready.
        assert!(status.traffic_notified_at.is_some());
    }

    #[test]
    fn orchestrated_traffic_requires_all_ready_and_first_call_wins() {
        let coordinator = ReadinessCoordinator::new(TrafficMode::Orchestrated);
        coordinator.add_component("db").unwrap();
        assert!(matches!(
            coordinator.notify_traffic_ready(),
            Err(ReadinessError::NotReady)
        ));

        coordinator.mark_ready("db").unwrap();
        assert!(coordinator.is_ready());
        assert!(!coordinator.is_traffic_ready());

        coordinator.notify_traffic_ready().unwrap();
        let first = coordinator.status().traffic_notified_at;
        coordinator.notify_traffic_ready().unwrap();
        assert_eq!(coordinator.status().traffic_notified_at, first);
        assert!(coordinator.is_traffic_ready());
    }

    #[tokio::test]
    async fn wait_traffic_ready_releases_on_notification() {
        let coordinator = ReadinessCoordinator::new(TrafficMode::Orchestrated);
        coordinator.add_component("db").unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.wait_traffic_ready(&CancelScope::new()).await })
        };
        coordinator.mark_ready("db").unwrap();
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        coordinator.notify_traffic_ready().unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_traffic_ready_returns_cancel_cause() {
        let coordinator = ReadinessCoordinator::new(TrafficMode::Orchestrated);
        coordinator.add_component("db").unwrap();
        coordinator.mark_ready("db").unwrap();

        let scope = CancelScope::with_timeout(Duration::from_millis(20));
        assert!(matches!(
            coordinator.wait_traffic_ready(&scope).await,
            Err(ReadinessError::Cancelled(CancelCause::DeadlineExceeded))
        ));
    }

    #[tokio::test]
    async fn wait_ready_returns_immediately_when_ready() {
        let coordinator = ReadinessCoordinator::default();
        coordinator.add_component("db").unwrap();
        coordinator.mark_ready("db").unwrap();

        let scope = CancelScope::new();
        scope.cancel();
        // Already ready wins over an already-cancelled scope.
        coordinator.wait_ready(&scope).await.unwrap();
    }

    #[tokio::test]
    async fn wait_ready_returns_deadline_cause() {
        let coordinator = ReadinessCoordinator::default();
        coordinator.add_component("db").unwrap();

        let started = tokio::time::Instant::now();
        let scope = CancelScope::with_timeout(Duration::from_millis(50));
        let result = coordinator.wait_ready(&scope).await;

        assert!(matches!(
            result,
            Err(ReadinessError::Cancelled(CancelCause::DeadlineExceeded))
        ));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn all_waiters_are_released_together() {
        let coordinator = ReadinessCoordinator::default();
        coordinator.add_component("db").unwrap();

        let mut waiters = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            waiters.push(tokio::spawn(async move {
                coordinator.wait_ready(&CancelScope::new()).await
            }));
        }

        tokio::task::yield_now().await;
        coordinator.mark_ready("db").unwrap();

        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_and_marking_converges() {
        let coordinator = ReadinessCoordinator::default();
        let names: Vec<String> = (0..64).map(|i| format!("component-{i}")).collect();
        for name in &names {
            coordinator.add_component(name).unwrap();
        }

        let mut tasks = Vec::new();
        for name in names.clone() {
            let coordinator = coordinator.clone();
            tasks.push(tokio::spawn(async move {
                coordinator.mark_ready(&name).unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(coordinator.is_ready());
        assert!(coordinator.status().components.iter().all(|c| c.ready));
    }
}
