//! Per-operation latency history and compliance checks.
//!
//! # Data Flow
//! ```text
//! track_operation(name) → OperationTracker
//!     → dropped / succeed() / fail()
//!     → record_metric()
//!         → ring buffer for `name` (oldest dropped at capacity)
//!         → Prometheus histogram
//!         → warning if above the operation's threshold
//!
//! get_stats / check_performance_requirements / get_performance_summary
//!     → read-only aggregation over the buffers
//! ```
//!
//! # Design Decisions
//! - Bounded memory: one ring buffer per operation name
//! - Thresholds swap atomically on config reload
//! - p95 is the sorted duration at zero-based index `floor(0.95 * n)`

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::clock::{SharedClock, SystemClock};
use crate::config::schema::PerformanceConfig;
use crate::observability::metadata::{Metadata, MetadataValue};
use crate::observability::metrics;

const ABANDONED: &str = "operation abandoned";

/// Maximum p95 as a multiple of the threshold.
const P95_TOLERANCE: f64 = 1.2;
const MIN_SUCCESS_RATE: f64 = 95.0;

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetric {
    pub operation: String,
    pub duration_ms: f64,
    /// Unix seconds.
    pub timestamp: u64,
    pub success: bool,
    pub metadata: Metadata,
    #[serde(skip)]
    recorded_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub operation: String,
    pub total_calls: usize,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub success_rate_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceState {
    Measured,
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceStatus {
    pub requirement_ms: u64,
    pub status: ComplianceState,
    pub total_calls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95_duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate_percent: Option<f64>,
    pub avg_compliant: bool,
    pub p95_compliant: bool,
    pub success_rate_ok: bool,
    pub overall_compliant: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: u64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryTotals {
    pub total_operations_tracked: usize,
    pub total_calls_in_window: usize,
    pub overall_success_rate_percent: f64,
    pub compliant_operations: usize,
    pub total_operations_with_requirements: usize,
    pub compliance_rate_percent: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub summary: SummaryTotals,
    pub operation_stats: BTreeMap<String, PerformanceStats>,
    pub compliance_status: BTreeMap<String, ComplianceStatus>,
    pub recent_failures: Vec<FailureRecord>,
}

pub struct PerformanceMonitor {
    metrics: Mutex<HashMap<String, VecDeque<PerformanceMetric>>>,
    capacity: usize,
    compliance_window: Duration,
    requirements: ArcSwap<BTreeMap<String, u64>>,
    clock: SharedClock,
}

impl PerformanceMonitor {
    pub fn new(config: &PerformanceConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: &PerformanceConfig, clock: SharedClock) -> Self {
        tracing::info!(
            capacity = config.max_metrics_per_operation,
            operations = config.requirements.len(),
            "Performance monitor initialized"
        );
        Self {
            metrics: Mutex::new(HashMap::new()),
            capacity: config.max_metrics_per_operation.max(1),
            compliance_window: Duration::from_secs(config.compliance_window_secs),
            requirements: ArcSwap::from_pointee(config.requirements.clone()),
            clock,
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, HashMap<String, VecDeque<PerformanceMetric>>>> {
        match self.metrics.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::error!("Performance metric store poisoned");
                None
            }
        }
    }

    pub fn requirements(&self) -> Arc<BTreeMap<String, u64>> {
        self.requirements.load_full()
    }

    /// Replace the threshold table.
    pub fn set_requirements(&self, requirements: BTreeMap<String, u64>) {
        tracing::info!(operations = requirements.len(), "Performance requirements updated");
        self.requirements.store(Arc::new(requirements));
    }

    /// Start timing one invocation of `operation`.
    pub fn track_operation(&self, operation: &str, metadata: Metadata) -> OperationTracker<'_> {
        OperationTracker {
            monitor: self,
            operation: operation.to_string(),
            metadata,
            started: self.clock.now(),
            finished: false,
        }
    }

    /// Time a fallible future.
    pub async fn track<T, E, F>(&self, operation: &str, metadata: Metadata, fut: F) -> Result<T, E>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        let tracker = self.track_operation(operation, metadata);
        let result = fut.await;
        match &result {
            Ok(_) => tracker.succeed(),
            Err(e) => tracker.fail(e),
        }
        result
    }

    pub fn record_metric(&self, operation: &str, duration_ms: f64, success: bool, metadata: Metadata) {
        let metric = PerformanceMetric {
            operation: operation.to_string(),
            duration_ms,
            timestamp: self.clock.unix_now(),
            success,
            metadata,
            recorded_at: self.clock.now(),
        };

        {
            let Some(mut store) = self.lock() else {
                return;
            };
            let buffer = store.entry(operation.to_string()).or_default();
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(metric);
        }

        metrics::record_operation(operation, duration_ms, success);

        if let Some(&requirement_ms) = self.requirements.load().get(operation) {
            if duration_ms > requirement_ms as f64 {
                tracing::warn!(
                    operation,
                    duration_ms,
                    requirement_ms,
                    "Performance requirement exceeded"
                );
            }
        }
        tracing::debug!(operation, duration_ms, success, "Recorded metric");
    }

    /// Aggregate statistics, optionally for one operation and a recent window.
    pub fn get_stats(
        &self,
        operation: Option<&str>,
        window: Option<Duration>,
    ) -> BTreeMap<String, PerformanceStats> {
        let Some(store) = self.lock() else {
            return BTreeMap::new();
        };
        let now = self.clock.now();

        let mut stats = BTreeMap::new();
        for (name, buffer) in store.iter() {
            if operation.is_some_and(|op| op != name.as_str()) {
                continue;
            }
            let samples: Vec<&PerformanceMetric> = buffer
                .iter()
                .filter(|m| window.map_or(true, |w| now.saturating_duration_since(m.recorded_at) <= w))
                .collect();
            if let Some(s) = aggregate(name, &samples) {
                stats.insert(name.clone(), s);
            }
        }
        stats
    }

    pub fn check_performance_requirements(&self) -> BTreeMap<String, ComplianceStatus> {
        let stats = self.get_stats(None, Some(self.compliance_window));
        self.requirements
            .load()
            .iter()
            .map(|(operation, &requirement_ms)| {
                let status = match stats.get(operation) {
                    Some(stat) => {
                        let avg_compliant = stat.avg_duration_ms <= requirement_ms as f64;
                        let p95_compliant = stat.p95_duration_ms <= requirement_ms as f64 * P95_TOLERANCE;
                        let success_rate_ok = stat.success_rate_percent >= MIN_SUCCESS_RATE;
                        ComplianceStatus {
                            requirement_ms,
                            status: ComplianceState::Measured,
                            total_calls: stat.total_calls,
                            avg_duration_ms: Some(stat.avg_duration_ms),
                            p95_duration_ms: Some(stat.p95_duration_ms),
                            success_rate_percent: Some(stat.success_rate_percent),
                            avg_compliant,
                            p95_compliant,
                            success_rate_ok,
                            overall_compliant: avg_compliant && p95_compliant && success_rate_ok,
                        }
                    }
                    None => ComplianceStatus {
                        requirement_ms,
                        status: ComplianceState::NoData,
                        total_calls: 0,
                        avg_duration_ms: None,
                        p95_duration_ms: None,
                        success_rate_percent: None,
                        avg_compliant: true,
                        p95_compliant: true,
                        success_rate_ok: true,
                        overall_compliant: true,
                    },
                };
                (operation.clone(), status)
            })
            .collect()
    }

    /// Failed samples, most recent first.
    pub fn get_recent_failures(&self, operation: Option<&str>, limit: usize) -> Vec<PerformanceMetric> {
        let Some(store) = self.lock() else {
            return Vec::new();
        };
        let mut failures: Vec<PerformanceMetric> = store
            .iter()
            .filter(|(name, _)| operation.map_or(true, |op| op == name.as_str()))
            .flat_map(|(_, buffer)| buffer.iter().filter(|m| !m.success).cloned())
            .collect();
        failures.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        failures.truncate(limit);
        failures
    }

    pub fn get_performance_summary(&self) -> PerformanceSummary {
        let stats = self.get_stats(None, Some(self.compliance_window));
        let compliance = self.check_performance_requirements();
        let recent_failures = self
            .get_recent_failures(None, 5)
            .into_iter()
            .map(|m| FailureRecord {
                error: m
                    .metadata
                    .get("error")
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown error".to_string()),
                operation: m.operation,
                duration_ms: round1(m.duration_ms),
                timestamp: m.timestamp,
            })
            .collect();

        let total_calls: usize = stats.values().map(|s| s.total_calls).sum();
        let total_failures: usize = stats.values().map(|s| s.failed_calls).sum();
        let overall_success_rate = if total_calls > 0 {
            (total_calls - total_failures) as f64 / total_calls as f64 * 100.0
        } else {
            100.0
        };
        let compliant = compliance.values().filter(|c| c.overall_compliant).count();
        let with_requirements = compliance.len();

        PerformanceSummary {
            summary: SummaryTotals {
                total_operations_tracked: stats.len(),
                total_calls_in_window: total_calls,
                overall_success_rate_percent: round1(overall_success_rate),
                compliant_operations: compliant,
                total_operations_with_requirements: with_requirements,
                compliance_rate_percent: if with_requirements > 0 {
                    round1(compliant as f64 / with_requirements as f64 * 100.0)
                } else {
                    100.0
                },
            },
            operation_stats: stats,
            compliance_status: compliance,
            recent_failures,
        }
    }

    /// Drop stored samples for one operation, or for all.
    pub fn clear_metrics(&self, operation: Option<&str>) {
        let Some(mut store) = self.lock() else {
            return;
        };
        match operation {
            Some(op) => {
                if let Some(buffer) = store.get_mut(op) {
                    buffer.clear();
                    tracing::info!(operation = op, "Cleared metrics for operation");
                }
            }
            None => {
                store.clear();
                tracing::info!("Cleared all performance metrics");
            }
        }
    }

    /// Log violations and a one-line summary. Run periodically.
    pub fn log_compliance_report(&self) {
        for (operation, status) in self.check_performance_requirements() {
            if !status.overall_compliant && status.total_calls > 0 {
                tracing::warn!(
                    operation = %operation,
                    avg_ms = status.avg_duration_ms.unwrap_or_default(),
                    p95_ms = status.p95_duration_ms.unwrap_or_default(),
                    success_rate = status.success_rate_percent.unwrap_or_default(),
                    requirement_ms = status.requirement_ms,
                    "Performance requirement violation"
                );
            }
        }
        let summary = self.get_performance_summary().summary;
        tracing::info!(
            calls = summary.total_calls_in_window,
            success_rate = summary.overall_success_rate_percent,
            compliance_rate = summary.compliance_rate_percent,
            "Performance summary"
        );
    }
}

fn aggregate(operation: &str, samples: &[&PerformanceMetric]) -> Option<PerformanceStats> {
    if samples.is_empty() {
        return None;
    }
    let mut durations: Vec<f64> = samples.iter().map(|m| m.duration_ms).collect();
    durations.sort_by(|a, b| a.total_cmp(b));

    let n = durations.len();
    let successes = samples.iter().filter(|m| m.success).count();
    // Zero-based index floor(0.95 * n), clamped to the last sample.
    let p95 = durations[((n as f64 * 0.95) as usize).min(n - 1)];

    Some(PerformanceStats {
        operation: operation.to_string(),
        total_calls: n,
        successful_calls: successes,
        failed_calls: n - successes,
        avg_duration_ms: durations.iter().sum::<f64>() / n as f64,
        min_duration_ms: durations[0],
        max_duration_ms: durations[n - 1],
        p95_duration_ms: p95,
        success_rate_percent: successes as f64 / n as f64 * 100.0,
    })
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Times one operation; records exactly once.
///
/// Dropping the tracker without calling [`succeed`](Self::succeed) or
/// [`fail`](Self::fail) records a failure.
pub struct OperationTracker<'a> {
    monitor: &'a PerformanceMonitor,
    operation: String,
    metadata: Metadata,
    started: Instant,
    finished: bool,
}

impl OperationTracker<'_> {
    /// Attach a field to the recorded metric.
    pub fn annotate(&mut self, key: &str, value: impl Into<MetadataValue>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn succeed(mut self) {
        self.finish(true, None);
    }

    pub fn fail(mut self, error: impl Display) {
        self.finish(false, Some(error.to_string()));
    }

    fn finish(&mut self, success: bool, error: Option<String>) {
        if self.finished {
            return;
        }
        self.finished = true;
        let elapsed = self.monitor.clock.now().saturating_duration_since(self.started);
        let mut metadata = std::mem::take(&mut self.metadata);
        if let Some(error) = error {
            metadata.insert("error".to_string(), MetadataValue::Str(error));
        }
        self.monitor
            .record_metric(&self.operation, elapsed.as_secs_f64() * 1000.0, success, metadata);
    }
}

impl Drop for OperationTracker<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(false, Some(ABANDONED.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn monitor() -> (PerformanceMonitor, ManualClock) {
        let clock = ManualClock::new();
        let monitor = PerformanceMonitor::with_clock(&PerformanceConfig::default(), Arc::new(clock.clone()));
        (monitor, clock)
    }

    #[test]
    fn test_p95_breaks_compliance_while_avg_passes() {
        let (monitor, _clock) = monitor();
        monitor.record_metric("website_analysis", 5000.0, true, Metadata::new());
        monitor.record_metric("website_analysis", 15000.0, true, Metadata::new());

        let status = &monitor.check_performance_requirements()["website_analysis"];
        assert_eq!(status.status, ComplianceState::Measured);
        assert_eq!(status.avg_duration_ms, Some(10000.0));
        assert!(status.avg_compliant);
        assert_eq!(status.p95_duration_ms, Some(15000.0));
        assert!(!status.p95_compliant);
        assert!(!status.overall_compliant);
    }

    #[test]
    fn test_no_data_is_vacuously_compliant() {
        let (monitor, _clock) = monitor();
        let compliance = monitor.check_performance_requirements();
        assert_eq!(compliance.len(), 5);
        let status = &compliance["repository_analysis"];
        assert_eq!(status.status, ComplianceState::NoData);
        assert!(status.overall_compliant);
    }

    #[test]
    fn test_stats_and_percentile_index() {
        let (monitor, _clock) = monitor();
        for ms in 1..=20 {
            monitor.record_metric("database_query", ms as f64, ms != 20, Metadata::new());
        }
        let stats = &monitor.get_stats(Some("database_query"), None)["database_query"];
        assert_eq!(stats.total_calls, 20);
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.min_duration_ms, 1.0);
        assert_eq!(stats.max_duration_ms, 20.0);
        assert_eq!(stats.p95_duration_ms, 20.0);
        assert_eq!(stats.avg_duration_ms, 10.5);
        assert_eq!(stats.success_rate_percent, 95.0);
    }

    #[test]
    fn test_p95_on_full_buffer_reports_slowest_tail() {
        let clock = ManualClock::new();
        let config = PerformanceConfig {
            max_metrics_per_operation: 1000,
            ..PerformanceConfig::default()
        };
        let monitor = PerformanceMonitor::with_clock(&config, Arc::new(clock));
        // 950 fast calls and 50 slow ones: index 950 is the first slow sample.
        for i in 0..1000 {
            let ms = if i < 950 { 100.0 } else { 20_000.0 };
            monitor.record_metric("website_analysis", ms, true, Metadata::new());
        }
        let status = &monitor.check_performance_requirements()["website_analysis"];
        assert_eq!(status.p95_duration_ms, Some(20_000.0));
        assert!(!status.p95_compliant);

        let (small, _clock) = self::monitor();
        for ms in 1..=7 {
            small.record_metric("op", ms as f64, true, Metadata::new());
        }
        assert_eq!(small.get_stats(Some("op"), None)["op"].p95_duration_ms, 7.0);
    }

    #[test]
    fn test_poisoned_store_reports_nothing() {
        let (monitor, _clock) = monitor();
        monitor.record_metric("op", 10.0, true, Metadata::new());

        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = monitor.metrics.lock();
                    panic!("metric store poisoned in test");
                })
                .join();
        });

        monitor.record_metric("op", 20.0, true, Metadata::new());
        assert!(monitor.get_stats(None, None).is_empty());
        assert!(monitor.get_recent_failures(None, 5).is_empty());
        let summary = monitor.get_performance_summary();
        assert_eq!(summary.summary.total_calls_in_window, 0);
        monitor.clear_metrics(None);
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let clock = ManualClock::new();
        let config = PerformanceConfig {
            max_metrics_per_operation: 3,
            ..PerformanceConfig::default()
        };
        let monitor = PerformanceMonitor::with_clock(&config, Arc::new(clock));
        for ms in [1.0, 2.0, 3.0, 4.0] {
            monitor.record_metric("op", ms, true, Metadata::new());
        }
        let stats = &monitor.get_stats(Some("op"), None)["op"];
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.min_duration_ms, 2.0);
    }

    #[test]
    fn test_window_excludes_old_samples() {
        let (monitor, clock) = monitor();
        monitor.record_metric("op", 100.0, true, Metadata::new());
        clock.advance(Duration::from_secs(7200));
        monitor.record_metric("op", 300.0, true, Metadata::new());

        let recent = &monitor.get_stats(None, Some(Duration::from_secs(3600)))["op"];
        assert_eq!(recent.total_calls, 1);
        assert_eq!(recent.avg_duration_ms, 300.0);
        assert_eq!(monitor.get_stats(None, None)["op"].total_calls, 2);
    }

    #[test]
    fn test_tracker_records_once_with_outcome() {
        let (monitor, clock) = monitor();

        let tracker = monitor.track_operation("age_calculation", crate::metadata! { "n" => 1u32 });
        clock.advance(Duration::from_millis(250));
        tracker.succeed();

        {
            let _abandoned = monitor.track_operation("age_calculation", Metadata::new());
            clock.advance(Duration::from_millis(50));
        }

        let mut failing = monitor.track_operation("age_calculation", Metadata::new());
        failing.annotate("url", "https://example.com");
        failing.fail("upstream 500");

        let stats = &monitor.get_stats(Some("age_calculation"), None)["age_calculation"];
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.successful_calls, 1);
        assert_eq!(stats.max_duration_ms, 250.0);

        let failures = monitor.get_recent_failures(Some("age_calculation"), 10);
        assert_eq!(failures.len(), 2);
        let errors: Vec<_> = failures.iter().map(|f| f.metadata["error"].to_string()).collect();
        assert!(errors.contains(&"upstream 500".to_string()));
        assert!(errors.contains(&ABANDONED.to_string()));
    }

    #[tokio::test]
    async fn test_track_future() {
        let (monitor, _clock) = monitor();
        let ok: Result<u8, String> = monitor.track("component_detection", Metadata::new(), async { Ok(1) }).await;
        let err: Result<u8, String> = monitor
            .track("component_detection", Metadata::new(), async { Err("boom".to_string()) })
            .await;
        assert_eq!(ok, Ok(1));
        assert!(err.is_err());

        let summary = monitor.get_performance_summary();
        assert_eq!(summary.summary.total_calls_in_window, 2);
        assert_eq!(summary.summary.overall_success_rate_percent, 50.0);
        assert_eq!(summary.recent_failures.len(), 1);
        assert_eq!(summary.recent_failures[0].error, "boom");
        assert_eq!(summary.summary.compliant_operations, 4);
    }

    #[test]
    fn test_clear_and_requirements_swap() {
        let (monitor, _clock) = monitor();
        monitor.record_metric("a", 1.0, true, Metadata::new());
        monitor.record_metric("b", 1.0, true, Metadata::new());
        monitor.clear_metrics(Some("a"));
        assert!(!monitor.get_stats(None, None).contains_key("a"));
        monitor.clear_metrics(None);
        assert!(monitor.get_stats(None, None).is_empty());

        monitor.set_requirements(BTreeMap::from([("a".to_string(), 5)]));
        assert_eq!(monitor.check_performance_requirements().len(), 1);
    }
}
