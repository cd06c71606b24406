//! Bounded analysis result cache with TTL expiry and LRU eviction.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

use crate::cache::key::CacheKey;
use crate::clock::{SharedClock, SystemClock};
use crate::config::CacheConfig;
use crate::observability::metrics;

/// A cached value plus its timing.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
    last_accessed_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

struct Inner<V> {
    entries: LruCache<CacheKey, CacheEntry<V>>,
    counters: Counters,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses) * 100`, or 0 before the first lookup.
    pub hit_rate_percent: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub size: usize,
    pub max_size: usize,
    pub utilization_percent: f64,
    pub default_ttl_secs: u64,
}

/// Inspection view of one entry. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntryInfo {
    pub cache_key: String,
    pub is_expired: bool,
    /// `None` for an entry that never expires.
    pub expires_in_seconds: Option<u64>,
    pub created_at: u64,
    pub last_accessed: u64,
    pub expires_at: Option<u64>,
}

/// Thread-safe result cache.
///
/// One mutex guards the whole map; every operation holds it only for the
/// in-memory update. A poisoned lock turns lookups into misses and stores into
/// no-ops instead of panicking the caller.
pub struct ResultCache<V> {
    inner: Mutex<Inner<V>>,
    max_size: NonZeroUsize,
    default_ttl: Duration,
    clock: SharedClock,
}

impl<V: Clone> ResultCache<V> {
    /// Create a cache on the system clock.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, SystemClock::shared())
    }

    pub fn with_clock(config: &CacheConfig, clock: SharedClock) -> Self {
        let max_size = NonZeroUsize::new(config.max_size).unwrap_or(NonZeroUsize::MIN);
        tracing::info!(
            max_size = max_size.get(),
            default_ttl_secs = config.default_ttl_secs,
            "Result cache initialized"
        );
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(max_size),
                counters: Counters::default(),
            }),
            max_size,
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            clock,
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, Inner<V>>> {
        match self.inner.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                tracing::error!("Result cache lock poisoned; failing closed");
                None
            }
        }
    }

    /// Look up a live entry, refreshing its recency.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let Some(mut inner) = self.lock() else {
            metrics::record_cache_lookup(false);
            return None;
        };
        let now = self.clock.now();

        let expired = match inner.entries.peek(key).map(|entry| entry.is_expired(now)) {
            Some(expired) => expired,
            None => {
                inner.counters.misses += 1;
                drop(inner);
                tracing::debug!(key = %key, "Cache miss");
                metrics::record_cache_lookup(false);
                return None;
            }
        };

        if expired {
            inner.entries.pop(key);
            inner.counters.expirations += 1;
            inner.counters.misses += 1;
            let size = inner.entries.len();
            drop(inner);
            tracing::debug!(key = %key, "Cache entry expired");
            metrics::record_cache_lookup(false);
            metrics::record_cache_size(size);
            return None;
        }

        let value = inner.entries.get_mut(key).map(|entry| {
            entry.last_accessed_at = now;
            entry.value.clone()
        });
        inner.counters.hits += 1;
        drop(inner);

        tracing::debug!(key = %key, "Cache hit");
        metrics::record_cache_lookup(true);
        value
    }

    /// Store a value with an explicit TTL.
    ///
    /// A new key at capacity evicts the least-recently-accessed entry first.
    /// Overwriting an existing key never evicts anything else.
    pub fn set(&self, key: CacheKey, value: V, ttl: Duration) {
        let Some(mut inner) = self.lock() else {
            return;
        };
        let now = self.clock.now();
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now.checked_add(ttl),
            last_accessed_at: now,
        };

        let evicted = match inner.entries.push(key.clone(), entry) {
            Some((old_key, _)) if old_key != key => Some(old_key),
            _ => None,
        };
        if evicted.is_some() {
            inner.counters.evictions += 1;
        }
        let size = inner.entries.len();
        drop(inner);

        if let Some(old_key) = evicted {
            tracing::debug!(evicted = %old_key, "Evicted least recently used cache entry");
            metrics::record_cache_eviction();
        }
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached analysis result");
        metrics::record_cache_size(size);
    }

    /// Store a value with the configured default TTL.
    pub fn set_default(&self, key: CacheKey, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Inspect an entry without touching statistics or recency.
    pub fn get_cache_info(&self, key: &CacheKey) -> Option<CacheEntryInfo> {
        let inner = self.lock()?;
        let now = self.clock.now();
        let entry = inner.entries.peek(key)?;
        Some(CacheEntryInfo {
            cache_key: key.to_string(),
            is_expired: entry.is_expired(now),
            expires_in_seconds: entry
                .expires_at
                .map(|at| at.saturating_duration_since(now).as_secs()),
            created_at: self.clock.unix_at(entry.created_at),
            last_accessed: self.clock.unix_at(entry.last_accessed_at),
            expires_at: entry.expires_at.map(|at| self.clock.unix_at(at)),
        })
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let now = self.clock.now();
        let expired: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.entries.pop(key);
        }
        inner.counters.expirations += expired.len() as u64;
        let size = inner.entries.len();
        drop(inner);

        if !expired.is_empty() {
            tracing::info!(removed = expired.len(), "Cleaned up expired cache entries");
        }
        metrics::record_cache_size(size);
        expired.len()
    }

    /// Remove all entries. Hit/miss counters are kept.
    pub fn clear(&self) {
        if let Some(mut inner) = self.lock() {
            inner.entries.clear();
        }
        metrics::record_cache_size(0);
        tracing::info!("Result cache cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_stats(&self) -> CacheStats {
        let (hits, misses, evictions, expirations, size) = match self.lock() {
            Some(inner) => (
                inner.counters.hits,
                inner.counters.misses,
                inner.counters.evictions,
                inner.counters.expirations,
                inner.entries.len(),
            ),
            None => (0, 0, 0, 0, 0),
        };
        let lookups = hits + misses;
        let hit_rate_percent = if lookups > 0 {
            hits as f64 / lookups as f64 * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate_percent,
            evictions,
            expirations,
            size,
            max_size: self.max_size.get(),
            utilization_percent: size as f64 / self.max_size.get() as f64 * 100.0,
            default_ttl_secs: self.default_ttl.as_secs(),
        }
    }
}
