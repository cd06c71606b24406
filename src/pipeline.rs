//! Request pipeline: admission, cache, guarded upstream call, metrics.
//!
//! # Data Flow
//! ```text
//! handle(client, request)
//!     → SlidingWindowRateLimiter::is_allowed(client)   denied → RateLimited
//!     → process(request)
//!         → OperationTracker started for the analysis kind
//!         → ResultCache::get(key)                       hit → Success
//!         → RetryExecutor::execute_with_retry(service, analyzer)
//!             Ok               → ResultCache::set(key, ttl for kind) → Success
//!             CircuitOpen      → degraded fallback
//!             Retryable        → degraded fallback
//!             NonRetryable     → Rejected
//!         → tracker settles with the outcome
//! ```
//!
//! # Design Decisions
//! - Every collaborator is an explicit object owned here; nothing global
//! - Failures come back as tagged outcomes, not errors
//! - Concurrent misses for one key are not coalesced; last write wins

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::cache::{AnalysisKind, CacheEntryInfo, CacheKey, CacheStats, ResultCache};
use crate::clock::{SharedClock, SystemClock};
use crate::config::schema::GatewayConfig;
use crate::observability::metadata::{Metadata, MetadataValue};
use crate::observability::performance::{PerformanceMonitor, PerformanceSummary};
use crate::resilience::errors::ServiceError;
use crate::resilience::fallback::{build_fallback, FallbackResponse};
use crate::resilience::retries::{RetryExecutor, ServiceStatus};
use crate::security::rate_limit::{RateDecision, RateLimitInfo, RateLimitPolicy, SlidingWindowRateLimiter};
use crate::upstream::{AnalysisRequest, Analyzer};

/// Result of running one request through the pipeline.
#[derive(Debug, Clone)]
pub enum AnalysisOutcome {
    Success {
        result: Value,
        cache_hit: bool,
        rate_limit: Option<RateLimitInfo>,
    },
    RateLimited(RateLimitInfo),
    CircuitOpen {
        service: String,
        retry_after_secs: u64,
        fallback: FallbackResponse,
    },
    RetryExhausted {
        service: String,
        attempts: u32,
        fallback: FallbackResponse,
    },
    Rejected {
        service: String,
        message: String,
    },
}

impl AnalysisOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheTtls {
    website: Duration,
    repository: Duration,
}

impl CacheTtls {
    fn for_kind(&self, kind: AnalysisKind) -> Duration {
        match kind {
            AnalysisKind::Website => self.website,
            AnalysisKind::Repository => self.repository,
        }
    }
}

pub struct RequestPipeline {
    cache: ResultCache<Value>,
    limiter: Arc<SlidingWindowRateLimiter>,
    executor: RetryExecutor,
    monitor: PerformanceMonitor,
    analyzer: Arc<dyn Analyzer>,
    ttls: CacheTtls,
}

impl RequestPipeline {
    pub fn new(config: &GatewayConfig, analyzer: Arc<dyn Analyzer>) -> Self {
        Self::with_clock(config, analyzer, SystemClock::shared())
    }

    pub fn with_clock(config: &GatewayConfig, analyzer: Arc<dyn Analyzer>, clock: SharedClock) -> Self {
        Self {
            cache: ResultCache::with_clock(&config.cache, Arc::clone(&clock)),
            limiter: Arc::new(SlidingWindowRateLimiter::with_clock(
                RateLimitPolicy::from(&config.rate_limit),
                Arc::clone(&clock),
            )),
            executor: RetryExecutor::new(config.resilience.clone(), Arc::clone(&clock)),
            monitor: PerformanceMonitor::with_clock(&config.performance, clock),
            analyzer,
            ttls: CacheTtls {
                website: Duration::from_secs(config.cache.website_ttl_secs),
                repository: Duration::from_secs(config.cache.repository_ttl_secs),
            },
        }
    }

    pub fn cache(&self) -> &ResultCache<Value> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowRateLimiter> {
        &self.limiter
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    pub fn monitor(&self) -> &PerformanceMonitor {
        &self.monitor
    }

    /// Rate-limit check for one client.
    pub fn admit(&self, client: &str) -> RateDecision {
        self.limiter.is_allowed(client)
    }

    /// Full pipeline including admission.
    pub async fn handle(&self, client: &str, request: AnalysisRequest) -> AnalysisOutcome {
        match self.admit(client) {
            RateDecision::Allowed(info) => self.process(request, Some(info)).await,
            RateDecision::Limited(info) => {
                tracing::warn!(client, "Rate limit exceeded");
                AnalysisOutcome::RateLimited(info)
            }
        }
    }

    /// Pipeline for an already-admitted request.
    pub async fn process(&self, request: AnalysisRequest, rate_limit: Option<RateLimitInfo>) -> AnalysisOutcome {
        let kind = request.kind;
        let key = CacheKey::new(&request.target, kind);

        let mut context = request.context.clone();
        context.insert("url".into(), MetadataValue::from(request.target.as_str()));
        context.insert("analysis_type".into(), MetadataValue::from(kind.as_str()));

        let mut tracker = self.monitor.track_operation(kind.operation_name(), context.clone());

        if let Some(result) = self.cache.get(&key) {
            tracker.annotate("cache_hit", true);
            tracker.succeed();
            return AnalysisOutcome::Success {
                result,
                cache_hit: true,
                rate_limit,
            };
        }
        tracker.annotate("cache_hit", false);

        let service = kind.service_name();
        let analyzer = &self.analyzer;
        let request = &request;
        let outcome = self
            .executor
            .execute_with_retry(service, move || analyzer.analyze(request))
            .await;

        match outcome {
            Ok(result) => {
                self.cache.set(key, result.clone(), self.ttls.for_kind(kind));
                tracker.succeed();
                AnalysisOutcome::Success {
                    result,
                    cache_hit: false,
                    rate_limit,
                }
            }
            Err(err) => {
                tracker.fail(&err);
                degraded_outcome(service, err, &context)
            }
        }
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.get_stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn get_cache_info(&self, target: &str, kind: AnalysisKind) -> Option<CacheEntryInfo> {
        self.cache.get_cache_info(&CacheKey::new(target, kind))
    }

    pub fn get_service_status(&self, service: &str) -> ServiceStatus {
        self.executor.get_service_status(service)
    }

    pub fn all_service_status(&self) -> Vec<ServiceStatus> {
        self.executor.all_service_status()
    }

    pub fn reset_circuit_breaker(&self, service: &str) -> bool {
        self.executor.reset_circuit_breaker(service)
    }

    pub fn get_performance_summary(&self) -> PerformanceSummary {
        self.monitor.get_performance_summary()
    }

    pub fn clear_metrics(&self, operation: Option<&str>) {
        self.monitor.clear_metrics(operation);
    }

    /// Apply the hot-reloadable parts of a new configuration.
    pub fn apply_config(&self, config: &GatewayConfig) {
        self.limiter.update_policy(RateLimitPolicy::from(&config.rate_limit));
        self.monitor.set_requirements(config.performance.requirements.clone());
    }
}

fn degraded_outcome(service: &str, err: ServiceError, context: &Metadata) -> AnalysisOutcome {
    match err {
        ServiceError::CircuitOpen { retry_after_secs, .. } => {
            tracing::warn!(service, retry_after_secs, "Serving fallback, circuit open");
            AnalysisOutcome::CircuitOpen {
                service: service.to_string(),
                retry_after_secs,
                fallback: build_fallback(service, &err, context),
            }
        }
        ServiceError::Retryable { attempts, .. } => {
            tracing::error!(service, attempts, error = %err, "Serving fallback, retries exhausted");
            AnalysisOutcome::RetryExhausted {
                service: service.to_string(),
                attempts,
                fallback: build_fallback(service, &err, context),
            }
        }
        ServiceError::NonRetryable { .. } => AnalysisOutcome::Rejected {
            service: service.to_string(),
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::schema::ServicePolicy;
    use crate::resilience::errors::UpstreamError;
    use crate::upstream::AnalyzeFuture;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Analyzer returning scripted results and counting calls.
    struct Scripted {
        calls: AtomicU32,
        failures: Mutex<Vec<UpstreamError>>,
    }

    impl Scripted {
        fn ok() -> Arc<Self> {
            Self::failing(vec![])
        }

        fn failing(failures: Vec<UpstreamError>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures: Mutex::new(failures),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Analyzer for Scripted {
        fn analyze<'a>(&'a self, request: &'a AnalysisRequest) -> AnalyzeFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let next = self.failures.lock().unwrap().pop();
                match next {
                    Some(err) => Err(err),
                    None => Ok(serde_json::json!({ "target": request.target })),
                }
            })
        }
    }

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.rate_limit.requests_per_minute = 3;
        let fast = ServicePolicy {
            failure_threshold: 2,
            recovery_timeout_secs: 60,
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        };
        config.resilience.services.insert("http_scraper".into(), fast.clone());
        config.resilience.services.insert("github_api".into(), fast);
        config
    }

    fn pipeline(analyzer: Arc<Scripted>) -> (RequestPipeline, ManualClock) {
        let clock = ManualClock::new();
        let pipeline = RequestPipeline::with_clock(&config(), analyzer, Arc::new(clock.clone()));
        (pipeline, clock)
    }

    #[tokio::test]
    async fn test_miss_then_hit_calls_upstream_once() {
        let analyzer = Scripted::ok();
        let (pipeline, _clock) = pipeline(analyzer.clone());

        let first = pipeline
            .process(AnalysisRequest::new("https://Example.com/", AnalysisKind::Website), None)
            .await;
        assert!(matches!(first, AnalysisOutcome::Success { cache_hit: false, .. }));

        let second = pipeline
            .process(AnalysisRequest::new("https://example.com", AnalysisKind::Website), None)
            .await;
        assert!(matches!(second, AnalysisOutcome::Success { cache_hit: true, .. }));
        assert_eq!(analyzer.calls(), 1);

        let stats = pipeline.get_cache_stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        assert_eq!(
            pipeline.monitor().get_stats(Some("website_analysis"), None)["website_analysis"].total_calls,
            2
        );
    }

    #[tokio::test]
    async fn test_per_kind_ttl() {
        let analyzer = Scripted::ok();
        let (pipeline, clock) = pipeline(analyzer.clone());
        let repo = || AnalysisRequest::new("https://github.com/a/b", AnalysisKind::Repository);

        pipeline.process(repo(), None).await;
        clock.advance(Duration::from_secs(1799));
        pipeline.process(repo(), None).await;
        assert_eq!(analyzer.calls(), 1);

        clock.advance(Duration::from_secs(1));
        pipeline.process(repo(), None).await;
        assert_eq!(analyzer.calls(), 2);
    }

    #[tokio::test]
    async fn test_handle_applies_rate_limit() {
        let (pipeline, _clock) = pipeline(Scripted::ok());
        for _ in 0..3 {
            let outcome = pipeline
                .handle("1.2.3.4", AnalysisRequest::new("https://a.test", AnalysisKind::Website))
                .await;
            assert!(outcome.is_success());
        }
        let denied = pipeline
            .handle("1.2.3.4", AnalysisRequest::new("https://a.test", AnalysisKind::Website))
            .await;
        assert!(matches!(denied, AnalysisOutcome::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_failures_degrade_then_open_circuit() {
        let analyzer = Scripted::failing(vec![UpstreamError::status(503); 10]);
        let (pipeline, _clock) = pipeline(analyzer.clone());
        let req = || AnalysisRequest::new("https://down.test", AnalysisKind::Website);

        match pipeline.process(req(), None).await {
            AnalysisOutcome::RetryExhausted { attempts, fallback, .. } => {
                assert_eq!(attempts, 2);
                assert!(fallback.fallback_active);
                assert_eq!(fallback.service_name, "http_scraper");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(analyzer.calls(), 2);

        match pipeline.process(req(), None).await {
            AnalysisOutcome::CircuitOpen { retry_after_secs, .. } => assert_eq!(retry_after_secs, 60),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(analyzer.calls(), 2);
        assert!(pipeline.get_cache_info("https://down.test", AnalysisKind::Website).is_none());

        assert!(pipeline.reset_circuit_breaker("http_scraper"));
        assert_eq!(
            pipeline.get_service_status("http_scraper").state,
            crate::resilience::CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_rejection_is_not_cached() {
        let analyzer = Scripted::failing(vec![UpstreamError::status(404)]);
        let (pipeline, _clock) = pipeline(analyzer.clone());
        let outcome = pipeline
            .process(AnalysisRequest::new("owner/missing", AnalysisKind::Repository), None)
            .await;
        assert!(matches!(outcome, AnalysisOutcome::Rejected { .. }));
        assert_eq!(pipeline.get_cache_stats().size, 0);

        let failures = pipeline.monitor().get_recent_failures(Some("repository_analysis"), 5);
        assert_eq!(failures.len(), 1);
    }

    #[tokio::test]
    async fn test_apply_config_updates_limits() {
        let (pipeline, _clock) = pipeline(Scripted::ok());
        let mut updated = config();
        updated.rate_limit.requests_per_minute = 1;
        pipeline.apply_config(&updated);
        assert!(pipeline.admit("c").is_allowed());
        assert!(!pipeline.admit("c").is_allowed());
    }
}
