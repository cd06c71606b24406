//! Time sources.
//!
//! Every time-dependent subsystem (cache TTLs, rate windows, breaker
//! cool-downs, metric timestamps) reads time through [`Clock`] so tests can
//! drive it with [`ManualClock`] instead of sleeping.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + Debug {
    /// Monotonic now, used for all interval arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock now, used only for reporting timestamps.
    fn system_now(&self) -> SystemTime;

    /// Seconds since the unix epoch for the current wall-clock time.
    fn unix_now(&self) -> u64 {
        unix_secs(self.system_now())
    }

    /// Map a monotonic instant onto wall-clock unix seconds.
    fn unix_at(&self, instant: Instant) -> u64 {
        let now = self.now();
        let wall = self.system_now();
        if instant >= now {
            wall.checked_add(instant - now).map_or(u64::MAX, unix_secs)
        } else {
            unix_secs(wall.checked_sub(now - instant).unwrap_or(UNIX_EPOCH))
        }
    }
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

pub(crate) fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Real time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same offset, so a test can hand one clone to a component
/// and keep another to advance time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base_instant: Instant,
    base_system: SystemTime,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base_instant: Instant::now(),
            base_system: SystemTime::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + self.offset()
    }

    fn system_now(&self) -> SystemTime {
        self.base_system + self.offset()
    }
}
