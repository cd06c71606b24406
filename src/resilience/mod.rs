//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an external service:
//!     → retries.rs (RetryExecutor: attempt loop with backoff)
//!     → circuit_breaker.rs (per-service admission and failure tracking)
//!     → timeouts.rs (deadline on each attempt)
//!     → errors.rs (classify the failure)
//!     → On final failure: fallback.rs (degraded response)
//! ```
//!
//! # Design Decisions
//! - Each service gets its own breaker and retry policy
//! - Only retryable failures are retried; rejections propagate at once
//! - A refused call never invokes the operation
//! - Fallbacks are plain data and never fail

pub mod backoff;
pub mod circuit_breaker;
pub mod errors;
pub mod fallback;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use errors::{FailureClass, ServiceError, UpstreamError};
pub use fallback::{build_fallback, FallbackResponse};
pub use retries::{RetryExecutor, ServiceStatus};
