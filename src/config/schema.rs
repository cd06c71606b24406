//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Root configuration for the analysis gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Result cache settings.
    pub cache: CacheConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Circuit breaker and retry policies.
    pub resilience: ResilienceConfig,

    /// Performance monitoring and compliance thresholds.
    pub performance: PerformanceConfig,

    /// Outbound calls to target sites and the repository API.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total time budget for one inbound request in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 120 }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached analyses.
    pub max_size: usize,

    /// TTL used when a caller does not pick one, in seconds.
    pub default_ttl_secs: u64,

    /// TTL for website analyses, in seconds.
    pub website_ttl_secs: u64,

    /// TTL for repository analyses, in seconds.
    pub repository_ttl_secs: u64,

    /// How often expired entries are swept, in seconds.
    pub maintenance_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_secs: 3600,
            website_ttl_secs: 3600,
            repository_ttl_secs: 1800,
            maintenance_interval_secs: 900,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Maximum requests per client in any 60 second window.
    pub requests_per_minute: u32,

    /// Maximum requests per client in any 3600 second window.
    pub requests_per_hour: u32,

    /// How often idle clients are swept from memory, in seconds.
    pub sweep_interval_secs: u64,

    /// Paths that bypass the limiter.
    pub exempt_paths: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 60,
            requests_per_hour: 1000,
            sweep_interval_secs: 300,
            exempt_paths: vec!["/".to_string(), "/health".to_string()],
        }
    }
}

/// Breaker and retry policy for one external service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServicePolicy {
    /// Counted failures before the breaker opens.
    pub failure_threshold: u32,

    /// Cool-down before an open breaker allows a trial call, in seconds.
    pub recovery_timeout_secs: u64,

    /// Maximum attempts per call, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

/// Resilience configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Whether non-retryable upstream rejections count toward opening the
    /// breaker.
    pub count_non_retryable_failures: bool,

    /// Policy for services without an explicit entry.
    pub default: ServicePolicy,

    /// Per-service overrides keyed by service name.
    pub services: HashMap<String, ServicePolicy>,
}

impl ResilienceConfig {
    /// Policy for a service, falling back to the default.
    pub fn policy_for(&self, service: &str) -> &ServicePolicy {
        self.services.get(service).unwrap_or(&self.default)
    }
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        let mut services = HashMap::new();
        services.insert(
            "github_api".to_string(),
            ServicePolicy {
                failure_threshold: 5,
                recovery_timeout_secs: 60,
                max_attempts: 3,
                base_delay_ms: 2000,
                max_delay_ms: 30_000,
                jitter: true,
            },
        );
        services.insert(
            "http_scraper".to_string(),
            ServicePolicy {
                failure_threshold: 3,
                recovery_timeout_secs: 30,
                max_attempts: 2,
                base_delay_ms: 1000,
                max_delay_ms: 10_000,
                jitter: true,
            },
        );
        Self {
            count_non_retryable_failures: false,
            default: ServicePolicy::default(),
            services,
        }
    }
}

/// Performance monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Samples kept per operation before the oldest are dropped.
    pub max_metrics_per_operation: usize,

    /// Window the compliance check looks back over, in seconds.
    pub compliance_window_secs: u64,

    /// How often the compliance report is logged, in seconds.
    pub report_interval_secs: u64,

    /// Duration requirement per operation, in milliseconds.
    pub requirements: BTreeMap<String, u64>,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        let requirements = [
            ("website_analysis", 10_000),
            ("repository_analysis", 30_000),
            ("database_query", 1_000),
            ("component_detection", 5_000),
            ("age_calculation", 1_000),
        ]
        .into_iter()
        .map(|(name, ms)| (name.to_string(), ms))
        .collect();

        Self {
            max_metrics_per_operation: 1000,
            compliance_window_secs: 3600,
            report_interval_secs: 600,
            requirements,
        }
    }
}

/// Outbound call configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the GitHub-compatible repository API.
    pub github_api_url: String,

    /// Per-attempt timeout for outbound calls, in seconds.
    pub request_timeout_secs: u64,

    /// User-Agent sent on outbound calls.
    pub user_agent: String,

    /// Honour `HTTP_PROXY` / `HTTPS_PROXY` from the environment.
    pub use_env_proxy: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            github_api_url: "https://api.github.com".to_string(),
            request_timeout_secs: 10,
            user_agent: concat!("stackdebt-gateway/", env!("CARGO_PKG_VERSION")).to_string(),
            use_env_proxy: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Require a bearer token on admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}
