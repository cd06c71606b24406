//! Property tests for the cache, rate limiter and backoff.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use stackdebt_gateway::cache::{AnalysisKind, CacheKey, ResultCache};
use stackdebt_gateway::clock::ManualClock;
use stackdebt_gateway::config::CacheConfig;
use stackdebt_gateway::resilience::backoff::calculate_backoff;
use stackdebt_gateway::security::rate_limit::{RateLimitPolicy, SlidingWindowRateLimiter};

#[derive(Debug, Clone)]
enum CacheOp {
    Set(u8),
    Get(u8),
    Advance(u16),
}

fn cache_op() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (0u8..32).prop_map(CacheOp::Set),
        (0u8..32).prop_map(CacheOp::Get),
        (0u16..120).prop_map(CacheOp::Advance),
    ]
}

fn key(n: u8) -> CacheKey {
    CacheKey::new(&format!("https://site-{n}.example"), AnalysisKind::Website)
}

proptest! {
    #[test]
    fn cache_never_exceeds_capacity(max_size in 1usize..16, ops in prop::collection::vec(cache_op(), 0..200)) {
        let clock = ManualClock::new();
        let config = CacheConfig { max_size, default_ttl_secs: 60, ..CacheConfig::default() };
        let cache: ResultCache<u32> = ResultCache::with_clock(&config, Arc::new(clock.clone()));

        for op in ops {
            match op {
                CacheOp::Set(n) => cache.set_default(key(n), n as u32),
                CacheOp::Get(n) => { cache.get(&key(n)); }
                CacheOp::Advance(secs) => clock.advance(Duration::from_secs(secs as u64)),
            }
            prop_assert!(cache.len() <= max_size);
        }
    }

    #[test]
    fn hit_rate_matches_counters(ops in prop::collection::vec(cache_op(), 1..200)) {
        let clock = ManualClock::new();
        let config = CacheConfig { max_size: 8, default_ttl_secs: 60, ..CacheConfig::default() };
        let cache: ResultCache<u32> = ResultCache::with_clock(&config, Arc::new(clock.clone()));

        let mut lookups = 0u64;
        for op in ops {
            match op {
                CacheOp::Set(n) => cache.set_default(key(n), n as u32),
                CacheOp::Get(n) => {
                    lookups += 1;
                    if let Some(value) = cache.get(&key(n)) {
                        prop_assert_eq!(value, n as u32);
                    }
                }
                CacheOp::Advance(secs) => clock.advance(Duration::from_secs(secs as u64)),
            }
        }

        let stats = cache.get_stats();
        prop_assert_eq!(stats.hits + stats.misses, lookups);
        if lookups == 0 {
            prop_assert_eq!(stats.hit_rate_percent, 0.0);
        } else {
            let expected = stats.hits as f64 / lookups as f64 * 100.0;
            prop_assert!((stats.hit_rate_percent - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn limiter_never_admits_more_than_minute_limit(
        per_minute in 1u32..10,
        gaps_ms in prop::collection::vec(0u64..5_000, 1..120),
    ) {
        let clock = ManualClock::new();
        let limiter = SlidingWindowRateLimiter::with_clock(
            RateLimitPolicy { requests_per_minute: per_minute, requests_per_hour: 10_000 },
            Arc::new(clock.clone()),
        );

        let mut admitted_at: Vec<u64> = Vec::new();
        let mut elapsed_ms = 0u64;
        for gap in gaps_ms {
            clock.advance(Duration::from_millis(gap));
            elapsed_ms += gap;
            if limiter.is_allowed("client").is_allowed() {
                admitted_at.push(elapsed_ms);
            }
            let in_window = admitted_at.iter().filter(|t| elapsed_ms - **t < 60_000).count();
            prop_assert!(in_window as u32 <= per_minute);
        }
    }

    #[test]
    fn backoff_is_bounded(attempt in 1u32..40, base_ms in 1u64..5_000, max_ms in 1u64..120_000, jitter: bool) {
        let delay = calculate_backoff(attempt, base_ms, max_ms, jitter).as_millis() as u64;
        let capped = base_ms.saturating_mul(2u64.saturating_pow(attempt - 1)).min(max_ms);
        prop_assert!(delay >= capped);
        prop_assert!(delay <= capped + capped / 10);
    }
}
