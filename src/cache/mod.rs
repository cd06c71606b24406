//! Analysis result caching.
//!
//! # Data Flow
//! ```text
//! Analysis request (url, kind)
//!     → key.rs (normalize target, build CacheKey)
//!     → store.rs (TTL check, LRU recency, hit/miss accounting)
//!     → hit: serve cached blob | miss: caller runs the analysis and stores it
//! ```
//!
//! # Design Decisions
//! - Bounded: capacity is fixed, the least recently accessed entry goes first
//! - Expired entries are never served; they are dropped lazily on lookup and
//!   in bulk by the maintenance task
//! - Values are opaque to the cache

pub mod key;
pub mod store;

pub use key::{normalize_target, AnalysisKind, CacheKey};
pub use store::{CacheEntryInfo, CacheStats, ResultCache};
