//! Failure taxonomy for external calls.
//!
//! Operations report an [`UpstreamError`]; the retry executor classifies it
//! and surfaces a [`ServiceError`] so callers can pick retry-later,
//! degraded-data or hard-failure handling without matching on messages.

use std::time::Duration;

use thiserror::Error;

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The dependency is struggling: timeouts, connection failures, 5xx,
    /// rate limiting. Retried and counted by the breaker.
    Retryable,
    /// The dependency rejected our input. Propagated immediately.
    NonRetryable,
}

/// Raw failure reported by a wrapped operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UpstreamError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("upstream returned HTTP {status}")]
    Status {
        status: u16,
        /// The upstream signalled quota exhaustion (e.g. a 403 with
        /// `X-RateLimit-Remaining: 0`).
        rate_limited: bool,
        retry_after_secs: Option<u64>,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

impl UpstreamError {
    pub fn status(status: u16) -> Self {
        UpstreamError::Status {
            status,
            rate_limited: false,
            retry_after_secs: None,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Connect(_) | UpstreamError::Other(_) => {
                FailureClass::Retryable
            }
            UpstreamError::InvalidInput(_) => FailureClass::NonRetryable,
            UpstreamError::Status {
                status,
                rate_limited,
                ..
            } => match status {
                429 => FailureClass::Retryable,
                403 if *rate_limited => FailureClass::Retryable,
                400..=499 => FailureClass::NonRetryable,
                _ => FailureClass::Retryable,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Retryable
    }

    /// Upstream hint for when to try again.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::Status {
                retry_after_secs: Some(secs),
                ..
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// Error surfaced by [`RetryExecutor`](crate::resilience::retries::RetryExecutor).
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Every permitted attempt failed with a retryable error.
    #[error("all {attempts} attempt(s) failed for {service}: {source}")]
    Retryable {
        service: String,
        attempts: u32,
        #[source]
        source: UpstreamError,
    },

    /// The upstream rejected the input; not retried.
    #[error("{service} rejected the request: {source}")]
    NonRetryable {
        service: String,
        #[source]
        source: UpstreamError,
    },

    /// The breaker is open; the operation was not invoked.
    #[error("circuit breaker for {service} is open")]
    CircuitOpen { service: String, retry_after_secs: u64 },
}

impl ServiceError {
    pub fn service(&self) -> &str {
        match self {
            ServiceError::Retryable { service, .. }
            | ServiceError::NonRetryable { service, .. }
            | ServiceError::CircuitOpen { service, .. } => service,
        }
    }

    /// Stable name used in degraded responses and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            ServiceError::Retryable { .. } => "RetryableError",
            ServiceError::NonRetryable { .. } => "NonRetryableError",
            ServiceError::CircuitOpen { .. } => "CircuitBreakerOpenError",
        }
    }

    /// Suggested wait before calling again, when one is known.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ServiceError::CircuitOpen { retry_after_secs, .. } => Some(*retry_after_secs),
            ServiceError::Retryable { source, .. } => source.retry_after().map(|d| d.as_secs()),
            ServiceError::NonRetryable { .. } => None,
        }
    }
}
