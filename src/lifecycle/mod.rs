//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger()
//!
//! Shutdown (shutdown.rs):
//!     broadcast → server stops accepting, drains, maintenance tasks exit
//!
//! Maintenance (maintenance.rs):
//!     periodic cache sweep, limiter sweep, compliance report
//! ```

pub mod maintenance;
pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
