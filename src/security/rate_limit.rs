//! Per-client sliding-window rate limiting.
//!
//! Each client keeps the instants of its admitted requests for the last hour.
//! A request is admitted only if fewer than `requests_per_minute` fall in the
//! last 60 seconds and fewer than `requests_per_hour` in the last 3600.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::net::SocketAddr;

use crate::clock::{SharedClock, SystemClock};
use crate::config::RateLimitConfig;
use crate::observability::metrics;
use crate::security::client_ip::client_key;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

/// Admission limits. Swapped atomically on config reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl From<&RateLimitConfig> for RateLimitPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            requests_per_minute: config.requests_per_minute,
            requests_per_hour: config.requests_per_hour,
        }
    }
}

/// Which window rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateWindow {
    Minute,
    Hour,
}

impl RateWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateWindow::Minute => "minute",
            RateWindow::Hour => "hour",
        }
    }
}

/// Limits, usage and reset times for one client. Reset times are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub requests_per_minute_limit: u32,
    pub requests_per_minute_remaining: u32,
    pub requests_per_hour_limit: u32,
    pub requests_per_hour_remaining: u32,
    pub reset_time_minute: u64,
    pub reset_time_hour: u64,
    pub current_minute_count: u32,
    pub current_hour_count: u32,
    /// Set when the request was denied because a window is full.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceeded: Option<RateWindow>,
}

impl RateLimitInfo {
    /// Seconds until the violated window frees a slot (at least 1).
    pub fn retry_after_secs(&self, unix_now: u64) -> u64 {
        let reset = match self.exceeded {
            Some(RateWindow::Hour) => self.reset_time_hour,
            _ => self.reset_time_minute,
        };
        reset.saturating_sub(unix_now).max(1)
    }

    /// The `X-RateLimit-*` response headers.
    pub fn headers(&self) -> HeaderMap {
        let pairs = [
            ("x-ratelimit-limit-minute", self.requests_per_minute_limit as u64),
            ("x-ratelimit-remaining-minute", self.requests_per_minute_remaining as u64),
            ("x-ratelimit-reset-minute", self.reset_time_minute),
            ("x-ratelimit-limit-hour", self.requests_per_hour_limit as u64),
            ("x-ratelimit-remaining-hour", self.requests_per_hour_remaining as u64),
            ("x-ratelimit-reset-hour", self.reset_time_hour),
        ];
        let mut headers = HeaderMap::with_capacity(pairs.len());
        for (name, value) in pairs {
            headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
        }
        headers
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed(RateLimitInfo),
    Limited(RateLimitInfo),
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed(_))
    }

    pub fn info(&self) -> &RateLimitInfo {
        match self {
            RateDecision::Allowed(info) | RateDecision::Limited(info) => info,
        }
    }

    pub fn into_info(self) -> RateLimitInfo {
        match self {
            RateDecision::Allowed(info) | RateDecision::Limited(info) => info,
        }
    }
}

/// Sliding-window limiter keyed by client.
pub struct SlidingWindowRateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    policy: ArcSwap<RateLimitPolicy>,
    clock: SharedClock,
}

impl SlidingWindowRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self::with_clock(policy, SystemClock::shared())
    }

    pub fn with_clock(policy: RateLimitPolicy, clock: SharedClock) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            policy: ArcSwap::from_pointee(policy),
            clock,
        }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        **self.policy.load()
    }

    /// Replace the limits. Recorded history is kept.
    pub fn update_policy(&self, policy: RateLimitPolicy) {
        tracing::info!(
            requests_per_minute = policy.requests_per_minute,
            requests_per_hour = policy.requests_per_hour,
            "Rate limit policy updated"
        );
        self.policy.store(Arc::new(policy));
    }

    /// Decide whether `client` may make a request now.
    ///
    /// Admitted requests are recorded; denied ones are not.
    pub fn is_allowed(&self, client: &str) -> RateDecision {
        let policy = self.policy();
        let now = self.clock.now();
        let unix_now = self.clock.unix_now();

        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::error!(client = %client, "Rate limiter lock poisoned; denying request");
                return RateDecision::Limited(RateLimitInfo {
                    requests_per_minute_limit: policy.requests_per_minute,
                    requests_per_minute_remaining: 0,
                    requests_per_hour_limit: policy.requests_per_hour,
                    requests_per_hour_remaining: 0,
                    reset_time_minute: unix_now + MINUTE.as_secs(),
                    reset_time_hour: unix_now + HOUR.as_secs(),
                    current_minute_count: 0,
                    current_hour_count: 0,
                    exceeded: None,
                });
            }
        };

        let window = windows.entry(client.to_string()).or_default();

        while window.front().is_some_and(|t| now.duration_since(*t) >= HOUR) {
            window.pop_front();
        }

        let minute_count = window
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) < MINUTE)
            .count() as u32;
        let hour_count = window.len() as u32;

        let exceeded = if minute_count >= policy.requests_per_minute {
            Some(RateWindow::Minute)
        } else if hour_count >= policy.requests_per_hour {
            Some(RateWindow::Hour)
        } else {
            None
        };

        let (minute_count, hour_count) = if exceeded.is_none() {
            window.push_back(now);
            (minute_count + 1, hour_count + 1)
        } else {
            (minute_count, hour_count)
        };

        let oldest_in_minute = window
            .len()
            .checked_sub(minute_count as usize)
            .and_then(|idx| window.get(idx))
            .copied();
        let oldest_in_hour = window.front().copied();
        let idle = window.is_empty();
        if idle {
            windows.remove(client);
        }
        drop(windows);

        let reset_at = |oldest: Option<Instant>, span: Duration| match oldest {
            Some(t) => self.clock.unix_at(t + span),
            None => unix_now + span.as_secs(),
        };

        let info = RateLimitInfo {
            requests_per_minute_limit: policy.requests_per_minute,
            requests_per_minute_remaining: policy.requests_per_minute.saturating_sub(minute_count),
            requests_per_hour_limit: policy.requests_per_hour,
            requests_per_hour_remaining: policy.requests_per_hour.saturating_sub(hour_count),
            reset_time_minute: reset_at(oldest_in_minute, MINUTE),
            reset_time_hour: reset_at(oldest_in_hour, HOUR),
            current_minute_count: minute_count,
            current_hour_count: hour_count,
            exceeded,
        };

        match exceeded {
            Some(window) => {
                tracing::warn!(
                    client = %client,
                    minute_count,
                    hour_count,
                    exceeded = window.as_str(),
                    "Rate limit exceeded"
                );
                metrics::record_rate_limited(window.as_str());
                RateDecision::Limited(info)
            }
            None => {
                tracing::debug!(client = %client, minute_count, hour_count, "Request admitted");
                RateDecision::Allowed(info)
            }
        }
    }

    /// Forget clients with no request inside the hour window.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let Ok(mut windows) = self.windows.lock() else {
            tracing::error!("Rate limiter lock poisoned; skipping sweep");
            return 0;
        };
        let before = windows.len();
        windows.retain(|_, window| window.back().is_some_and(|t| now.duration_since(*t) < HOUR));
        let removed = before - windows.len();
        drop(windows);

        if removed > 0 {
            tracing::debug!(removed, "Swept idle rate limit clients");
        }
        removed
    }

    /// Number of clients currently holding history.
    pub fn tracked_clients(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

/// State for the rate limit middleware.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<SlidingWindowRateLimiter>,
    pub exempt_paths: Arc<Vec<String>>,
    pub clock: SharedClock,
}

#[derive(Serialize)]
struct RateLimitBody {
    message: String,
    error: &'static str,
    rate_limit_info: RateLimitInfo,
    retry_after_seconds: u64,
}

/// Middleware function for per-client rate limiting.
///
/// Admitted responses carry `X-RateLimit-*` headers; the admission info is
/// also placed in request extensions for handlers.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if state.exempt_paths.iter().any(|p| p == request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_key(request.headers(), peer);

    match state.limiter.is_allowed(&key) {
        RateDecision::Allowed(info) => {
            let headers = info.headers();
            request.extensions_mut().insert(info);
            let mut response = next.run(request).await;
            response.headers_mut().extend(headers);
            response
        }
        RateDecision::Limited(info) => rate_limited_response(&info, state.clock.unix_now()),
    }
}

/// Build the 429 response for a denied request.
pub fn rate_limited_response(info: &RateLimitInfo, unix_now: u64) -> Response {
    let retry_after = info.retry_after_secs(unix_now);
    let window = info.exceeded.unwrap_or(RateWindow::Minute);
    let body = RateLimitBody {
        message: format!("Rate limit exceeded: too many requests per {}", window.as_str()),
        error: "RateLimitExceeded",
        rate_limit_info: info.clone(),
        retry_after_seconds: retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.extend(info.headers());
    headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn limiter(per_minute: u32, per_hour: u32, clock: &ManualClock) -> SlidingWindowRateLimiter {
        SlidingWindowRateLimiter::with_clock(
            RateLimitPolicy {
                requests_per_minute: per_minute,
                requests_per_hour: per_hour,
            },
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn test_minute_limit() {
        let clock = ManualClock::new();
        let limiter = limiter(5, 100, &clock);

        for i in 0..5 {
            let decision = limiter.is_allowed("10.0.0.1");
            assert!(decision.is_allowed(), "request {} should be admitted", i + 1);
            assert_eq!(decision.info().requests_per_minute_remaining, 4 - i);
        }

        let denied = limiter.is_allowed("10.0.0.1");
        assert!(!denied.is_allowed());
        let info = denied.info();
        assert_eq!(info.requests_per_minute_remaining, 0);
        assert_eq!(info.requests_per_hour_remaining, 95);
        assert_eq!(info.current_minute_count, 5);
        assert_eq!(info.exceeded, Some(RateWindow::Minute));
    }

    #[test]
    fn test_clients_are_independent() {
        let clock = ManualClock::new();
        let limiter = limiter(2, 100, &clock);

        assert!(limiter.is_allowed("a").is_allowed());
        assert!(limiter.is_allowed("a").is_allowed());
        assert!(!limiter.is_allowed("a").is_allowed());

        let other = limiter.is_allowed("b");
        assert!(other.is_allowed());
        assert_eq!(other.info().current_minute_count, 1);
    }

    #[test]
    fn test_window_slides() {
        let clock = ManualClock::new();
        let limiter = limiter(2, 100, &clock);

        assert!(limiter.is_allowed("a").is_allowed());
        clock.advance(Duration::from_secs(30));
        assert!(limiter.is_allowed("a").is_allowed());
        assert!(!limiter.is_allowed("a").is_allowed());

        // First request ages out of the minute window.
        clock.advance(Duration::from_secs(30));
        let decision = limiter.is_allowed("a");
        assert!(decision.is_allowed());
        assert_eq!(decision.info().current_minute_count, 2);
        assert_eq!(decision.info().current_hour_count, 3);
    }

    #[test]
    fn test_hour_limit_reports_minute_remaining() {
        let clock = ManualClock::new();
        let limiter = limiter(10, 3, &clock);

        for _ in 0..3 {
            assert!(limiter.is_allowed("a").is_allowed());
            clock.advance(Duration::from_secs(61));
        }
        let denied = limiter.is_allowed("a");
        assert!(!denied.is_allowed());
        assert_eq!(denied.info().exceeded, Some(RateWindow::Hour));
        assert_eq!(denied.info().requests_per_hour_remaining, 0);
        assert_eq!(denied.info().requests_per_minute_remaining, 10);

        clock.advance(Duration::from_secs(3600));
        assert!(limiter.is_allowed("a").is_allowed());
    }

    #[test]
    fn test_reset_time_tracks_oldest_request() {
        let clock = ManualClock::new();
        let limiter = limiter(2, 100, &clock);
        let start = clock.unix_now();

        limiter.is_allowed("a");
        clock.advance(Duration::from_secs(20));
        let info = limiter.is_allowed("a").into_info();
        assert_eq!(info.reset_time_minute, start + 60);
        assert_eq!(info.reset_time_hour, start + 3600);

        let denied = limiter.is_allowed("a").into_info();
        assert_eq!(denied.retry_after_secs(clock.unix_now()), 40);
    }

    #[test]
    fn test_poisoned_lock_denies() {
        let clock = ManualClock::new();
        let limiter = limiter(5, 100, &clock);
        assert!(limiter.is_allowed("10.0.0.1").is_allowed());

        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = limiter.windows.lock();
                    panic!("limiter lock poisoned in test");
                })
                .join();
        });

        let decision = limiter.is_allowed("10.0.0.2");
        assert!(!decision.is_allowed());
        assert_eq!(decision.info().requests_per_minute_remaining, 0);
        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_sweep_drops_idle_clients() {
        let clock = ManualClock::new();
        let limiter = limiter(5, 100, &clock);
        limiter.is_allowed("old");
        clock.advance(Duration::from_secs(1800));
        limiter.is_allowed("recent");
        clock.advance(Duration::from_secs(1800));

        assert_eq!(limiter.tracked_clients(), 2);
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_policy_update_applies_to_existing_history() {
        let clock = ManualClock::new();
        let limiter = limiter(5, 100, &clock);
        for _ in 0..3 {
            limiter.is_allowed("a");
        }
        limiter.update_policy(RateLimitPolicy {
            requests_per_minute: 3,
            requests_per_hour: 100,
        });
        assert!(!limiter.is_allowed("a").is_allowed());
    }

    #[test]
    fn test_headers_and_429_response() {
        let clock = ManualClock::new();
        let limiter = limiter(1, 100, &clock);
        limiter.is_allowed("a");
        let info = limiter.is_allowed("a").into_info();

        let response = rate_limited_response(&info, clock.unix_now());
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-remaining-minute"], "0");
        assert_eq!(response.headers()["retry-after"], "60");
    }
}
