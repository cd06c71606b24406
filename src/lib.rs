//! StackDebt analysis gateway.
//!
//! Admission, caching, resilience and performance tracking for an analysis
//! API whose real work depends on slow, unreliable external services.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod security;
pub mod upstream;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{AnalysisOutcome, RequestPipeline};
