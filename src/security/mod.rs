//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client_ip.rs (derive the caller key from headers / peer address)
//!     → rate_limit.rs (per-caller minute and hour windows)
//!     → Pass to handlers (limit info attached as an extension)
//! ```
//!
//! # Design Decisions
//! - Exempt paths (liveness) skip limiting
//! - Denials carry reset times so clients can back off precisely
//! - Internal failures fail closed

pub mod client_ip;
pub mod rate_limit;

pub use client_ip::client_key;
pub use rate_limit::{RateDecision, RateLimitInfo, SlidingWindowRateLimiter};
