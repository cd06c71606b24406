//! Per-service circuit breaker.
//!
//! # States
//! ```text
//! Closed → Open:     counted failures >= failure_threshold
//! Open → HalfOpen:   first call after recovery_timeout has elapsed
//! HalfOpen → Closed: the trial call succeeds
//! HalfOpen → Open:   the trial call fails
//! ```
//!
//! # Design Decisions
//! - Callers hold a [`CallPermit`] for the duration of one attempt and
//!   report the outcome through it
//! - Half-open admits exactly one trial; the permit releases the slot on
//!   drop so a cancelled trial cannot wedge the breaker
//! - A poisoned lock rejects calls
//! - Transitions are logged and exported as metrics

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::schema::ServicePolicy;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at: Option<Instant>,
    pub last_failure_at: Option<Instant>,
    /// When an open breaker will admit its trial call. `None` while closed
    /// or when the cool-down reaches past what `Instant` can represent.
    pub next_attempt_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerState>,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(service: &str, policy: &ServicePolicy, clock: SharedClock) -> Self {
        Self {
            service: service.to_string(),
            failure_threshold: policy.failure_threshold.max(1),
            recovery_timeout: Duration::from_secs(policy.recovery_timeout_secs),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                last_failure_at: None,
                trial_in_flight: false,
            }),
            clock,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn lock(&self) -> Option<MutexGuard<'_, BreakerState>> {
        match self.inner.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::error!(service = %self.service, "Circuit breaker state poisoned");
                None
            }
        }
    }

    /// Ask to make one call.
    ///
    /// Returns a permit, or the time until the breaker may admit a call.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, Duration> {
        let Some(mut inner) = self.lock() else {
            return Err(self.recovery_timeout);
        };
        let now = self.clock.now();

        match inner.state {
            CircuitState::Closed => Ok(self.permit(false)),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                } else {
                    Err(self.recovery_timeout - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(Duration::from_secs(1))
                } else {
                    inner.trial_in_flight = true;
                    Ok(self.permit(true))
                }
            }
        }
    }

    fn permit(self: &Arc<Self>, trial: bool) -> CallPermit {
        CallPermit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        }
    }

    fn on_success(&self, trial: bool) {
        let Some(mut inner) = self.lock() else {
            return;
        };
        match inner.state {
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.failure_count = 0;
                inner.opened_at = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Closed => inner.failure_count = 0,
            // Late result from a call admitted before the breaker opened.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let Some(mut inner) = self.lock() else {
            return;
        };
        let now = self.clock.now();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.failure_threshold => {
                inner.opened_at = Some(now);
                tracing::warn!(
                    service = %self.service,
                    failures = inner.failure_count,
                    "Circuit breaker opened"
                );
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.opened_at = Some(now);
                tracing::warn!(service = %self.service, "Trial call failed, circuit re-opened");
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn on_release(&self, trial: bool) {
        if !trial {
            return;
        }
        if let Some(mut inner) = self.lock() {
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        tracing::info!(
            service = %self.service,
            from = from.as_str(),
            to = to.as_str(),
            "Circuit breaker state change"
        );
        metrics::record_circuit_transition(&self.service, from, to);
    }

    pub fn snapshot(&self) -> Option<BreakerSnapshot> {
        let inner = self.lock()?;
        let next_attempt_at = match inner.state {
            CircuitState::Open => inner
                .opened_at
                .and_then(|at| at.checked_add(self.recovery_timeout)),
            _ => None,
        };
        Some(BreakerSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            opened_at: inner.opened_at,
            last_failure_at: inner.last_failure_at,
            next_attempt_at,
        })
    }

    pub fn state(&self) -> Option<CircuitState> {
        self.lock().map(|inner| inner.state)
    }

    /// Force the breaker closed and clear its counters.
    pub fn reset(&self) {
        let Some(mut inner) = self.lock() else {
            return;
        };
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.last_failure_at = None;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
        tracing::info!(service = %self.service, "Circuit breaker reset");
    }
}

/// Admission for a single call.
///
/// Settle it with [`succeed`](Self::succeed), [`fail`](Self::fail) or
/// [`release`](Self::release). Dropping it unsettled releases it.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// Give the permit back without recording an outcome.
    pub fn release(mut self) {
        self.settled = true;
        self.breaker.on_release(self.trial);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_release(self.trial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn breaker(threshold: u32, recovery_secs: u64) -> (Arc<CircuitBreaker>, ManualClock) {
        let clock = ManualClock::new();
        let policy = ServicePolicy {
            failure_threshold: threshold,
            recovery_timeout_secs: recovery_secs,
            ..ServicePolicy::default()
        };
        let breaker = Arc::new(CircuitBreaker::new("github_api", &policy, Arc::new(clock.clone())));
        (breaker, clock)
    }

    fn fail_once(breaker: &Arc<CircuitBreaker>) {
        breaker.try_acquire().expect("permit").fail();
    }

    #[test]
    fn test_opens_at_threshold() {
        let (breaker, _clock) = breaker(3, 60);
        fail_once(&breaker);
        fail_once(&breaker);
        assert_eq!(breaker.state(), Some(CircuitState::Closed));
        fail_once(&breaker);
        assert_eq!(breaker.state(), Some(CircuitState::Open));

        let wait = breaker.try_acquire().unwrap_err();
        assert_eq!(wait, Duration::from_secs(60));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (breaker, _clock) = breaker(3, 60);
        fail_once(&breaker);
        fail_once(&breaker);
        breaker.try_acquire().unwrap().succeed();
        fail_once(&breaker);
        fail_once(&breaker);
        assert_eq!(breaker.state(), Some(CircuitState::Closed));
        assert_eq!(breaker.snapshot().unwrap().failure_count, 2);
    }

    #[test]
    fn test_half_open_single_trial_then_close() {
        let (breaker, clock) = breaker(1, 30);
        fail_once(&breaker);
        assert!(breaker.try_acquire().is_err());

        clock.advance(Duration::from_secs(30));
        let trial = breaker.try_acquire().expect("trial permit");
        assert!(trial.is_trial());
        assert_eq!(breaker.state(), Some(CircuitState::HalfOpen));

        // Concurrent callers are refused while the trial runs.
        assert!(breaker.try_acquire().is_err());

        trial.succeed();
        assert_eq!(breaker.state(), Some(CircuitState::Closed));
        assert_eq!(breaker.snapshot().unwrap().failure_count, 0);
    }

    #[test]
    fn test_failed_trial_reopens() {
        let (breaker, clock) = breaker(1, 30);
        fail_once(&breaker);
        clock.advance(Duration::from_secs(31));
        breaker.try_acquire().unwrap().fail();
        assert_eq!(breaker.state(), Some(CircuitState::Open));

        // Cool-down restarts from the failed trial.
        clock.advance(Duration::from_secs(10));
        assert_eq!(breaker.try_acquire().unwrap_err(), Duration::from_secs(20));
    }

    #[test]
    fn test_dropped_trial_frees_slot() {
        let (breaker, clock) = breaker(1, 5);
        fail_once(&breaker);
        clock.advance(Duration::from_secs(5));
        {
            let _trial = breaker.try_acquire().unwrap();
        }
        assert_eq!(breaker.state(), Some(CircuitState::HalfOpen));
        assert!(breaker.try_acquire().unwrap().is_trial());
    }

    #[test]
    fn test_unbounded_cool_down_has_no_next_attempt() {
        let (breaker, clock) = breaker(1, u64::MAX);
        fail_once(&breaker);

        let snap = breaker.snapshot().unwrap();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.next_attempt_at, None);

        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert!(breaker.try_acquire().is_err());
        // Still usable afterwards.
        breaker.reset();
        assert!(breaker.try_acquire().is_ok());
    }

    #[test]
    fn test_poisoned_lock_refuses_calls() {
        let (breaker, _clock) = breaker(3, 60);

        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = breaker.inner.lock();
                    panic!("breaker lock poisoned in test");
                })
                .join();
        });

        assert_eq!(breaker.try_acquire().unwrap_err(), Duration::from_secs(60));
        assert_eq!(breaker.state(), None);
        assert!(breaker.snapshot().is_none());
    }

    #[test]
    fn test_reset_and_snapshot() {
        let (breaker, clock) = breaker(2, 60);
        fail_once(&breaker);
        fail_once(&breaker);
        let snap = breaker.snapshot().unwrap();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.next_attempt_at, Some(clock.now() + Duration::from_secs(60)));

        breaker.reset();
        let snap = breaker.snapshot().unwrap();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert!(snap.opened_at.is_none());
        assert!(breaker.try_acquire().is_ok());
    }
}
