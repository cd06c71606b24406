//! Background maintenance tasks.
//!
//! # Tasks
//! - Cache sweep: drop expired entries every `cache.maintenance_interval_secs`
//! - Limiter sweep: forget idle clients every `rate_limit.sweep_interval_secs`
//! - Compliance report: log violations every `performance.report_interval_secs`
//!
//! Each task stops when the shutdown broadcast fires.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::validation::MAX_DURATION_SECS;
use crate::config::GatewayConfig;
use crate::pipeline::RequestPipeline;

pub fn spawn_all(
    pipeline: Arc<RequestPipeline>,
    config: &GatewayConfig,
    shutdown: &broadcast::Receiver<()>,
) -> Vec<JoinHandle<()>> {
    let cache = Arc::clone(&pipeline);
    let limiter = Arc::clone(&pipeline);
    let monitor = pipeline;

    vec![
        spawn_periodic(
            "cache_sweep",
            Duration::from_secs(config.cache.maintenance_interval_secs),
            shutdown.resubscribe(),
            move || {
                let cache = Arc::clone(&cache);
                async move {
                    cache.cache().cleanup_expired();
                }
            },
        ),
        spawn_periodic(
            "rate_limit_sweep",
            Duration::from_secs(config.rate_limit.sweep_interval_secs),
            shutdown.resubscribe(),
            move || {
                let limiter = Arc::clone(&limiter);
                async move {
                    limiter.limiter().sweep();
                }
            },
        ),
        spawn_periodic(
            "compliance_report",
            Duration::from_secs(config.performance.report_interval_secs),
            shutdown.resubscribe(),
            move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.monitor().log_compliance_report();
                }
            },
        ),
    ]
}

/// Run `task` every `period` until shutdown. The first run happens one
/// period after start.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    task: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let period = period.clamp(Duration::from_millis(1), Duration::from_secs(MAX_DURATION_SECS));
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(task = name, period_secs = period.as_secs(), "Maintenance task started");

        loop {
            tokio::select! {
                _ = interval.tick() => task().await,
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!(task = name, "Maintenance task stopped");
    })
}
