//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::schema::ServicePolicy;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max_ms`, plus up to 10% jitter when enabled.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, jitter: bool) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter_ms = if jitter && jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter_ms)
}

/// Delay after failed attempt `attempt` under `policy`.
///
/// An upstream `Retry-After` hint raises the delay but never past the
/// policy cap.
pub fn delay_for(attempt: u32, policy: &ServicePolicy, hint: Option<Duration>) -> Duration {
    let computed = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms, policy.jitter);
    match hint {
        Some(hint) => computed.max(hint.min(Duration::from_millis(policy.max_delay_ms))),
        None => computed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        assert_eq!(calculate_backoff(1, 100, 2000, false), Duration::from_millis(100));
        assert_eq!(calculate_backoff(2, 100, 2000, false), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, 100, 2000, false), Duration::from_millis(400));
        assert_eq!(calculate_backoff(10, 100, 1000, false), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(64, 100, 1000, false), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for _ in 0..50 {
            let delay = calculate_backoff(2, 1000, 60_000, true).as_millis();
            assert!((2000..2200).contains(&delay));
        }
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = ServicePolicy {
            base_delay_ms: 100,
            max_delay_ms: 5000,
            jitter: false,
            ..ServicePolicy::default()
        };
        assert_eq!(delay_for(1, &policy, None), Duration::from_millis(100));
        assert_eq!(delay_for(1, &policy, Some(Duration::from_secs(2))), Duration::from_secs(2));
        assert_eq!(delay_for(1, &policy, Some(Duration::from_secs(60))), Duration::from_secs(5));
    }
}
