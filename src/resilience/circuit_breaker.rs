//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: dependency assumed down, requests fail fast
//! - Half-Open: a bounded number of trial calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: after open_interval
//! Half-Open → Closed: a trial call succeeds
//! Half-Open → Open: a trial call fails (interval restarts)
//! ```
//!
//! # Design Decisions
//! - [`BreakerMachine`] is a plain state machine driven by explicit `now` values
//! - An admitted call is a [`BreakerCall`] guard; the machine is "evaluating" until
//!   the guard records a verdict or is dropped
//! - Every state change starts a new generation; late verdicts from an older
//!   generation are discarded
//! - What counts as a failure is decided by one [`FailurePolicy`]

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::http::response::{FailureKind, Outcome};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Call counters for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that open a closed breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing trial calls.
    pub open_interval: Duration,
    /// Concurrent trial calls allowed while half-open.
    pub half_open_max_calls: u32,
    /// Closed-state counters are cleared every `window`, if set.
    pub window: Option<Duration>,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_interval: Duration::from_secs(30),
            half_open_max_calls: 1,
            window: None,
        }
    }
}

/// How one call's outcome feeds the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
    /// Neither success nor failure; the call is forgotten.
    Ignored,
}

/// Classifies a finished call.
pub trait FailurePolicy: Send + Sync {
    fn classify(&self, outcome: &Outcome) -> Verdict;
}

/// Counts only server/internal faults.
///
/// Client-input faults count as successes (the dependency answered correctly).
/// Admission rejections and aborted requests are ignored entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerFaultPolicy;

impl FailurePolicy for ServerFaultPolicy {
    fn classify(&self, outcome: &Outcome) -> Verdict {
        match outcome {
            Ok(response) if response.status().is_server_error() => Verdict::Failure,
            Ok(_) => Verdict::Success,
            Err(failure) => match failure.kind() {
                FailureKind::Internal | FailureKind::Unavailable | FailureKind::PanicRecovered => {
                    Verdict::Failure
                }
                FailureKind::ClientInput => Verdict::Success,
                FailureKind::RateLimited
                | FailureKind::BulkheadFull
                | FailureKind::BreakerOpen
                | FailureKind::DeadlineExceeded
                | FailureKind::Cancelled => Verdict::Ignored,
            },
        }
    }
}

/// Proof that the machine admitted a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    generation: u64,
    trial: bool,
}

/// Why the machine refused a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    Open,
    TooManyTrials,
}

/// The breaker's finite state machine. Not synchronized; see [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct BreakerMachine {
    settings: BreakerSettings,
    state: BreakerState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
    trials_in_flight: u32,
    transitions: Vec<(BreakerState, BreakerState)>,
}

impl BreakerMachine {
    pub fn new(settings: BreakerSettings, now: Instant) -> Self {
        let mut machine = Self {
            settings,
            state: BreakerState::Closed,
            generation: 0,
            counts: Counts::default(),
            expiry: None,
            trials_in_flight: 0,
            transitions: Vec::new(),
        };
        machine.new_generation(now);
        machine
    }

    /// Current state after applying any time-based transition.
    pub fn state(&mut self, now: Instant) -> BreakerState {
        self.refresh(now);
        self.state
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    /// Admit or refuse a call.
    pub fn admit(&mut self, now: Instant) -> Result<Admission, Refusal> {
        self.refresh(now);
        match self.state {
            BreakerState::Open => Err(Refusal::Open),
            BreakerState::HalfOpen if self.trials_in_flight >= self.settings.half_open_max_calls => {
                Err(Refusal::TooManyTrials)
            }
            BreakerState::HalfOpen => {
                self.trials_in_flight += 1;
                self.counts.requests = self.counts.requests.saturating_add(1);
                Ok(Admission {
                    generation: self.generation,
                    trial: true,
                })
            }
            BreakerState::Closed => {
                self.counts.requests = self.counts.requests.saturating_add(1);
                Ok(Admission {
                    generation: self.generation,
                    trial: false,
                })
            }
        }
    }

    /// Feed back the verdict of an admitted call.
    pub fn record(&mut self, admission: Admission, verdict: Verdict, now: Instant) {
        self.refresh(now);
        if admission.generation != self.generation {
            return;
        }
        if admission.trial {
            self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
        }

        match verdict {
            Verdict::Success => {
                self.counts.on_success();
                if self.state == BreakerState::HalfOpen {
                    self.set_state(BreakerState::Closed, now);
                }
            }
            Verdict::Failure => {
                self.counts.on_failure();
                match self.state {
                    BreakerState::Closed
                        if self.counts.consecutive_failures >= self.settings.failure_threshold =>
                    {
                        self.set_state(BreakerState::Open, now);
                    }
                    BreakerState::HalfOpen => self.set_state(BreakerState::Open, now),
                    _ => {}
                }
            }
            Verdict::Ignored => {}
        }
    }

    /// Forget an admitted call that never produced a verdict.
    pub fn abandon(&mut self, admission: Admission) {
        if admission.generation == self.generation && admission.trial {
            self.trials_in_flight = self.trials_in_flight.saturating_sub(1);
        }
    }

    /// Transitions since the last call, oldest first.
    pub fn take_transitions(&mut self) -> Vec<(BreakerState, BreakerState)> {
        std::mem::take(&mut self.transitions)
    }

    fn refresh(&mut self, now: Instant) {
        let expired = self.expiry.is_some_and(|expiry| expiry <= now);
        match self.state {
            BreakerState::Closed if expired => self.new_generation(now),
            BreakerState::Open if expired => self.set_state(BreakerState::HalfOpen, now),
            _ => {}
        }
    }

    fn set_state(&mut self, next: BreakerState, now: Instant) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        self.new_generation(now);
        self.transitions.push((previous, next));
    }

    fn new_generation(&mut self, now: Instant) {
        self.generation = self.generation.wrapping_add(1);
        self.counts = Counts::default();
        self.trials_in_flight = 0;
        self.expiry = match self.state {
            BreakerState::Closed => self.settings.window.map(|window| now + window),
            BreakerState::Open => Some(now + self.settings.open_interval),
            BreakerState::HalfOpen => None,
        };
    }
}

/// Structured state-change event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    pub name: String,
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker '{name}' is {state}")]
pub struct BreakerOpen {
    pub name: String,
    pub state: BreakerState,
}

/// Thread-safe named breaker.
pub struct CircuitBreaker {
    name: String,
    machine: Mutex<BreakerMachine>,
    policy: Arc<dyn FailurePolicy>,
    events: broadcast::Sender<StateTransition>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            name: name.into(),
            machine: Mutex::new(BreakerMachine::new(settings, Instant::now())),
            policy: Arc::new(ServerFaultPolicy),
            events,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(
            config.name.clone(),
            BreakerSettings {
                failure_threshold: config.failure_threshold,
                open_interval: Duration::from_millis(config.open_interval_ms),
                half_open_max_calls: config.half_open_max_calls,
                window: (config.window_ms > 0).then(|| Duration::from_millis(config.window_ms)),
            },
        )
    }

    /// Replace the failure classification policy.
    pub fn with_policy(mut self, policy: Arc<dyn FailurePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &dyn FailurePolicy {
        self.policy.as_ref()
    }

    pub fn state(&self) -> BreakerState {
        self.with_machine(|machine, now| machine.state(now))
    }

    pub fn counts(&self) -> Counts {
        self.with_machine(|machine, now| {
            machine.state(now);
            machine.counts()
        })
    }

    /// Subscribe to state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StateTransition> {
        self.events.subscribe()
    }

    /// Ask to run a call. Never suspends.
    pub fn try_acquire(&self) -> Result<BreakerCall<'_>, BreakerOpen> {
        let admitted = self.with_machine(|machine, now| {
            machine.admit(now).map_err(|_| machine.state(now))
        });
        match admitted {
            Ok(admission) => Ok(BreakerCall {
                breaker: self,
                admission: Some(admission),
            }),
            Err(state) => Err(BreakerOpen {
                name: self.name.clone(),
                state,
            }),
        }
    }

    fn with_machine<R>(&self, f: impl FnOnce(&mut BreakerMachine, Instant) -> R) -> R {
        let (result, transitions) = {
            let mut machine = self.machine.lock().unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut machine, Instant::now());
            (result, machine.take_transitions())
        };
        for (from, to) in transitions {
            self.emit(from, to);
        }
        result
    }

    fn emit(&self, from: BreakerState, to: BreakerState) {
        if to == BreakerState::Open {
            tracing::warn!(breaker = %self.name, from = %from, to = %to, "Circuit breaker state changed");
        } else {
            tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit breaker state changed");
        }
        metrics::record_breaker_transition(&self.name, from.as_str(), to.as_str());
        let _ = self.events.send(StateTransition {
            name: self.name.clone(),
            from,
            to,
        });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An admitted, in-flight call.
///
/// Dropped without a verdict, the call is forgotten; dropped while unwinding
/// from a panic, it counts as a failure.
#[derive(Debug)]
pub struct BreakerCall<'a> {
    breaker: &'a CircuitBreaker,
    admission: Option<Admission>,
}

impl BreakerCall<'_> {
    pub fn record(mut self, verdict: Verdict) {
        if let Some(admission) = self.admission.take() {
            self.breaker
                .with_machine(|machine, now| machine.record(admission, verdict, now));
        }
    }

    /// Classify `outcome` with the breaker's policy and record it.
    pub fn record_outcome(self, outcome: &Outcome) {
        let verdict = self.breaker.policy.classify(outcome);
        self.record(verdict);
    }
}

impl Drop for BreakerCall<'_> {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            if std::thread::panicking() {
                self.breaker.with_machine(|machine, now| {
                    machine.record(admission, Verdict::Failure, now)
                });
            } else {
                self.breaker
                    .with_machine(|machine, _| machine.abandon(admission));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::Failure;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn settings() -> BreakerSettings {
        BreakerSettings {
            failure_threshold: 3,
            open_interval: Duration::from_secs(10),
            half_open_max_calls: 1,
            window: None,
        }
    }

    #[test]
    fn machine_opens_at_threshold() {
        let t0 = Instant::now();
        let mut machine = BreakerMachine::new(settings(), t0);

        for _ in 0..2 {
            let admission = machine.admit(t0).unwrap();
            machine.record(admission, Verdict::Failure, t0);
        }
        assert_eq!(machine.state(t0), BreakerState::Closed);

        let admission = machine.admit(t0).unwrap();
        machine.record(admission, Verdict::Failure, t0);
        assert_eq!(machine.state(t0), BreakerState::Open);
        assert_eq!(
            machine.take_transitions(),
            vec![(BreakerState::Closed, BreakerState::Open)]
        );
        assert_eq!(machine.admit(t0), Err(Refusal::Open));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let t0 = Instant::now();
        let mut machine = BreakerMachine::new(settings(), t0);

        for verdict in [Verdict::Failure, Verdict::Failure, Verdict::Success, Verdict::Failure] {
            let admission = machine.admit(t0).unwrap();
            machine.record(admission, verdict, t0);
        }
        assert_eq!(machine.state(t0), BreakerState::Closed);
        assert_eq!(machine.counts().consecutive_failures, 1);
    }

    #[test]
    fn half_open_admits_bounded_trials() {
        let t0 = Instant::now();
        let mut machine = BreakerMachine::new(settings(), t0);
        for _ in 0..3 {
            let admission = machine.admit(t0).unwrap();
            machine.record(admission, Verdict::Failure, t0);
        }

        let later = t0 + Duration::from_secs(10);
        assert_eq!(machine.state(later), BreakerState::HalfOpen);

        let trial = machine.admit(later).unwrap();
        assert_eq!(machine.admit(later), Err(Refusal::TooManyTrials));

        machine.record(trial, Verdict::Success, later);
        assert_eq!(machine.state(later), BreakerState::Closed);
        assert_eq!(machine.counts(), Counts::default());
    }

    #[test]
    fn half_open_failure_reopens_and_restarts_clock() {
        let t0 = Instant::now();
        let mut machine = BreakerMachine::new(settings(), t0);
        for _ in 0..3 {
            let admission = machine.admit(t0).unwrap();
            machine.record(admission, Verdict::Failure, t0);
        }

        let t1 = t0 + Duration::from_secs(15);
        let trial = machine.admit(t1).unwrap();
        machine.record(trial, Verdict::Failure, t1);
        assert_eq!(machine.state(t1), BreakerState::Open);

        // Interval is measured from the re-open, not the first open.
        assert_eq!(machine.state(t1 + Duration::from_secs(9)), BreakerState::Open);
        assert_eq!(
            machine.state(t1 + Duration::from_secs(10)),
            BreakerState::HalfOpen
        );
    }

    #[test]
    fn abandoned_trial_frees_its_slot() {
        let t0 = Instant::now();
        let mut machine = BreakerMachine::new(settings(), t0);
        for _ in 0..3 {
            let admission = machine.admit(t0).unwrap();
            machine.record(admission, Verdict::Failure, t0);
        }
        let later = t0 + Duration::from_secs(10);
        let trial = machine.admit(later).unwrap();
        machine.abandon(trial);
        assert!(machine.admit(later).is_ok());
    }

    #[test]
    fn stale_generation_verdicts_are_discarded() {
        let t0 = Instant::now();
        let mut machine = BreakerMachine::new(settings(), t0);
        let slow = machine.admit(t0).unwrap();
        for _ in 0..3 {
            let admission = machine.admit(t0).unwrap();
            machine.record(admission, Verdict::Failure, t0);
        }
        let later = t0 + Duration::from_secs(10);
        assert_eq!(machine.state(later), BreakerState::HalfOpen);

        // A success from before the breaker opened must not close it.
        machine.record(slow, Verdict::Success, later);
        assert_eq!(machine.state(later), BreakerState::HalfOpen);
    }

    #[test]
    fn window_clears_closed_counters() {
        let t0 = Instant::now();
        let mut machine = BreakerMachine::new(
            BreakerSettings {
                window: Some(Duration::from_secs(1)),
                ..settings()
            },
            t0,
        );
        for _ in 0..2 {
            let admission = machine.admit(t0).unwrap();
            machine.record(admission, Verdict::Failure, t0);
        }
        let t1 = t0 + Duration::from_secs(1);
        let admission = machine.admit(t1).unwrap();
        machine.record(admission, Verdict::Failure, t1);
        assert_eq!(machine.state(t1), BreakerState::Closed);
        assert_eq!(machine.counts().consecutive_failures, 1);
    }

    #[test]
    fn policy_counts_only_server_faults() {
        let policy = ServerFaultPolicy;
        let server_error: Outcome = Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
        let client_error: Outcome = Ok(StatusCode::BAD_REQUEST.into_response());
        let ok: Outcome = Ok(StatusCode::OK.into_response());

        assert_eq!(policy.classify(&server_error), Verdict::Failure);
        assert_eq!(policy.classify(&client_error), Verdict::Success);
        assert_eq!(policy.classify(&ok), Verdict::Success);
        assert_eq!(
            policy.classify(&Err(Failure::internal("boom"))),
            Verdict::Failure
        );
        assert_eq!(
            policy.classify(&Err(Failure::client_input("bad field"))),
            Verdict::Success
        );
        assert_eq!(
            policy.classify(&Err(Failure::deadline_exceeded())),
            Verdict::Ignored
        );
        assert_eq!(policy.classify(&Err(Failure::bulkhead_full())), Verdict::Ignored);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_emits_transition_events() {
        let breaker = CircuitBreaker::new("payments", settings());
        let mut events = breaker.subscribe();

        for _ in 0..3 {
            breaker.try_acquire().unwrap().record(Verdict::Failure);
        }
        let err = breaker.try_acquire().unwrap_err();
        assert_eq!(err.state, BreakerState::Open);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            StateTransition {
                name: "payments".into(),
                from: BreakerState::Closed,
                to: BreakerState::Open,
            }
        );

        tokio::time::advance(Duration::from_secs(10)).await;
        let probe = breaker.try_acquire().unwrap();
        assert!(breaker.try_acquire().is_err());
        probe.record(Verdict::Success);
        assert_eq!(breaker.state(), BreakerState::Closed);

        assert_eq!(events.recv().await.unwrap().to, BreakerState::HalfOpen);
        assert_eq!(events.recv().await.unwrap().to, BreakerState::Closed);
    }

    #[test]
    fn panic_during_call_counts_as_failure() {
        let breaker = CircuitBreaker::new(
            "flaky",
            BreakerSettings {
                failure_threshold: 1,
                ..settings()
            },
        );
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _call = breaker.try_acquire().unwrap();
            panic!("handler bug");
        }));
        assert!(result.is_err());
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn dropped_call_is_not_counted() {
        let breaker = CircuitBreaker::new(
            "aborted",
            BreakerSettings {
                failure_threshold: 1,
                ..settings()
            },
        );
        drop(breaker.try_acquire().unwrap());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.counts().total_failures, 0);
    }
}
