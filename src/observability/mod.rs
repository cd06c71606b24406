//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (Prometheus counters, gauges, histograms)
//!     → performance.rs (per-operation latency history and compliance)
//!
//! metadata.rs supplies the scalar key/value maps attached to tracked
//! operations and degraded responses.
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all request logs
//! - Metrics helpers are no-ops until a recorder is installed

pub mod logging;
pub mod metadata;
pub mod metrics;
pub mod performance;

pub use metadata::{Metadata, MetadataValue};
pub use performance::{OperationTracker, PerformanceMonitor};
