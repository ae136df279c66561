//! Time sources for bucket refill accounting.
//!
//! Buckets record their last refill as whole seconds since the Unix epoch. The limiter reads
//! the current time from a [`Clock`] and passes it to the store, so every instance sharing a
//! store should run with reasonably synchronized clocks. Regressions are tolerated: a bucket
//! never refills for negative elapsed time.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Source of the current time in whole seconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in seconds since the Unix epoch.
    fn now_seconds(&self) -> u64;
}

/// Wall clock backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> u64 {
        // A system clock set before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test can hand one clone to a limiter and advance another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `now_seconds`.
    pub fn new(now_seconds: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(now_seconds)),
        }
    }

    /// Move the clock forward by `seconds`.
    pub fn advance(&self, seconds: u64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }

    /// Set the clock to `now_seconds`. Moving backwards is allowed.
    pub fn set(&self, now_seconds: u64) {
        self.now.store(now_seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
