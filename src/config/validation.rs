//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and cross-field rules.
//! Every problem is reported, not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{GatewayConfig, ServicePolicy};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Longest accepted duration for any TTL, interval or cool-down.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 3600;

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be > 0"));
    }

    if config.cache.max_size == 0 {
        errors.push(ValidationError::new("cache.max_size", "must be > 0"));
    }
    for (field, ttl) in [
        ("cache.default_ttl_secs", config.cache.default_ttl_secs),
        ("cache.website_ttl_secs", config.cache.website_ttl_secs),
        ("cache.repository_ttl_secs", config.cache.repository_ttl_secs),
        ("cache.maintenance_interval_secs", config.cache.maintenance_interval_secs),
    ] {
        if ttl == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }

    let rl = &config.rate_limit;
    if rl.requests_per_minute == 0 {
        errors.push(ValidationError::new("rate_limit.requests_per_minute", "must be > 0"));
    }
    if rl.requests_per_hour < rl.requests_per_minute {
        errors.push(ValidationError::new(
            "rate_limit.requests_per_hour",
            "must be >= requests_per_minute",
        ));
    }
    if rl.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("rate_limit.sweep_interval_secs", "must be > 0"));
    }

    for (field, secs) in [
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("cache.default_ttl_secs", config.cache.default_ttl_secs),
        ("cache.website_ttl_secs", config.cache.website_ttl_secs),
        ("cache.repository_ttl_secs", config.cache.repository_ttl_secs),
        ("cache.maintenance_interval_secs", config.cache.maintenance_interval_secs),
        ("rate_limit.sweep_interval_secs", rl.sweep_interval_secs),
        ("performance.compliance_window_secs", config.performance.compliance_window_secs),
        ("performance.report_interval_secs", config.performance.report_interval_secs),
        ("upstream.request_timeout_secs", config.upstream.request_timeout_secs),
    ] {
        check_upper_bound(field, secs, &mut errors);
    }

    validate_policy("resilience.default", &config.resilience.default, &mut errors);
    for (name, policy) in &config.resilience.services {
        validate_policy(&format!("resilience.services.{}", name), policy, &mut errors);
    }

    let perf = &config.performance;
    if perf.max_metrics_per_operation == 0 {
        errors.push(ValidationError::new("performance.max_metrics_per_operation", "must be > 0"));
    }
    if perf.report_interval_secs == 0 {
        errors.push(ValidationError::new("performance.report_interval_secs", "must be > 0"));
    }
    for (operation, ms) in &perf.requirements {
        if *ms == 0 {
            errors.push(ValidationError::new(
                format!("performance.requirements.{}", operation),
                "must be > 0",
            ));
        }
    }

    if url::Url::parse(&config.upstream.github_api_url).is_err() {
        errors.push(ValidationError::new("upstream.github_api_url", "not a valid URL"));
    }
    if config.upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.request_timeout_secs", "must be > 0"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_upper_bound(field: &str, secs: u64, errors: &mut Vec<ValidationError>) {
    if secs > MAX_DURATION_SECS {
        errors.push(ValidationError::new(
            field,
            format!("must be <= {} seconds", MAX_DURATION_SECS),
        ));
    }
}

fn validate_policy(prefix: &str, policy: &ServicePolicy, errors: &mut Vec<ValidationError>) {
    check_upper_bound(
        &format!("{}.recovery_timeout_secs", prefix),
        policy.recovery_timeout_secs,
        errors,
    );
    check_upper_bound(
        &format!("{}.max_delay_ms", prefix),
        policy.max_delay_ms / 1000,
        errors,
    );
    if policy.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.failure_threshold", prefix), "must be > 0"));
    }
    if policy.max_attempts == 0 {
        errors.push(ValidationError::new(format!("{}.max_attempts", prefix), "must be > 0"));
    }
    if policy.max_delay_ms < policy.base_delay_ms {
        errors.push(ValidationError::new(
            format!("{}.max_delay_ms", prefix),
            "must be >= base_delay_ms",
        ));
    }
}
