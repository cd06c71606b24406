//! Retry executor guarded by per-service circuit breakers.
//!
//! # Data Flow
//! ```text
//! execute_with_retry(service, op)
//!     → breaker.try_acquire()      (refused → CircuitOpen / Retryable)
//!     → op()
//!         Ok        → permit.succeed(), return
//!         retryable → permit.fail(), sleep(backoff), next attempt
//!         rejected  → permit released (or failed), NonRetryable
//!     → attempts exhausted → Retryable
//! ```

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::schema::ResilienceConfig;
use crate::observability::metrics;
use crate::resilience::backoff::delay_for;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::resilience::errors::{FailureClass, ServiceError, UpstreamError};

/// Breaker status as reported on the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub service_name: String,
    /// Configured explicitly or called at least once.
    pub known: bool,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub opened_at: Option<u64>,
    pub last_failure_at: Option<u64>,
    pub next_attempt_at: Option<u64>,
}

pub struct RetryExecutor {
    config: ResilienceConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    clock: SharedClock,
}

impl RetryExecutor {
    pub fn new(config: ResilienceConfig, clock: SharedClock) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            clock,
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(service) {
            return Arc::clone(existing.value());
        }
        let entry = self.breakers.entry(service.to_string()).or_insert_with(|| {
            let policy = self.config.policy_for(service);
            Arc::new(CircuitBreaker::new(service, policy, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }

    /// Run `operation` under the retry policy and breaker for `service`.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        service: &str,
        mut operation: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let policy = self.config.policy_for(service).clone();
        let max_attempts = policy.max_attempts.max(1);
        let breaker = self.breaker(service);
        let mut last_error: Option<UpstreamError> = None;

        for attempt in 1..=max_attempts {
            let permit = match breaker.try_acquire() {
                Ok(permit) => permit,
                Err(wait) => {
                    let retry_after_secs = wait.as_secs_f64().ceil() as u64;
                    return Err(match last_error {
                        None => {
                            tracing::debug!(service, retry_after_secs, "Call refused by open circuit");
                            ServiceError::CircuitOpen {
                                service: service.to_string(),
                                retry_after_secs,
                            }
                        }
                        Some(source) => ServiceError::Retryable {
                            service: service.to_string(),
                            attempts: attempt - 1,
                            source,
                        },
                    });
                }
            };

            let err = match operation().await {
                Ok(value) => {
                    permit.succeed();
                    if attempt > 1 {
                        tracing::info!(service, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.class() == FailureClass::NonRetryable {
                if self.config.count_non_retryable_failures {
                    permit.fail();
                } else {
                    permit.release();
                }
                tracing::warn!(service, error = %err, "Non-retryable upstream failure");
                return Err(ServiceError::NonRetryable {
                    service: service.to_string(),
                    source: err,
                });
            }

            permit.fail();
            if attempt < max_attempts {
                let delay = delay_for(attempt, &policy, err.retry_after());
                tracing::warn!(
                    service,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Attempt failed, retrying"
                );
                metrics::record_retry(service);
                tokio::time::sleep(delay).await;
            } else {
                tracing::error!(service, attempts = max_attempts, error = %err, "All attempts failed");
            }
            last_error = Some(err);
        }

        Err(ServiceError::Retryable {
            service: service.to_string(),
            attempts: max_attempts,
            source: last_error.unwrap_or_else(|| UpstreamError::Other("no attempt made".into())),
        })
    }

    pub fn get_service_status(&self, service: &str) -> ServiceStatus {
        let known = self.config.services.contains_key(service) || self.breakers.contains_key(service);
        let policy = self.config.policy_for(service);
        let snapshot = self.breakers.get(service).and_then(|b| b.snapshot());

        let mut status = ServiceStatus {
            service_name: service.to_string(),
            known,
            state: CircuitState::Closed,
            failure_count: 0,
            failure_threshold: policy.failure_threshold,
            recovery_timeout_secs: policy.recovery_timeout_secs,
            opened_at: None,
            last_failure_at: None,
            next_attempt_at: None,
        };
        if let Some(snap) = snapshot {
            status.state = snap.state;
            status.failure_count = snap.failure_count;
            status.opened_at = snap.opened_at.map(|at| self.clock.unix_at(at));
            status.last_failure_at = snap.last_failure_at.map(|at| self.clock.unix_at(at));
            status.next_attempt_at = snap.next_attempt_at.map(|at| self.clock.unix_at(at));
        }
        status
    }

    /// Status of every configured or previously called service, by name.
    pub fn all_service_status(&self) -> Vec<ServiceStatus> {
        let mut names: Vec<String> = self.config.services.keys().cloned().collect();
        for entry in self.breakers.iter() {
            if !names.contains(entry.key()) {
                names.push(entry.key().clone());
            }
        }
        names.sort();
        names.iter().map(|name| self.get_service_status(name)).collect()
    }

    /// Force a service's breaker closed. Returns false if it was never used.
    pub fn reset_circuit_breaker(&self, service: &str) -> bool {
        match self.breakers.get(service) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}
