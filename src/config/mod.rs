//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server applies reloadable parts (rate limits, thresholds)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Cache capacity and breaker policies need a restart; limits and
//!   performance thresholds reload live

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CacheConfig, GatewayConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    PerformanceConfig, RateLimitConfig, ResilienceConfig, ServicePolicy, TimeoutConfig,
    UpstreamConfig,
};
