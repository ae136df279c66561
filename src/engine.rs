//! Token-bucket protocol rules.
//!
//! These functions are the single definition of how a bucket moves from one state to the
//! next. [`LocalBucketStore`](crate::local::LocalBucketStore) runs them under a per-key lock;
//! the Redis store runs a Lua transcription of the same steps inside the server.
//!
//! # Consume
//!
//! 1. Missing bucket: start full, with `last_refill_time = now`.
//! 2. `elapsed = max(0, now - last_refill_time)`.
//! 3. Add `elapsed * refill_rate` tokens. The refill timestamp only moves when that credit is
//!    positive.
//! 4. Cap at `capacity`.
//! 5. Take `requested` tokens if available, otherwise leave the count unchanged.
//! 6. The caller persists the new state even on denial, and refreshes the idle expiry.

/// Persisted bucket record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Available tokens, in `[0, capacity]`. Fractional credit is kept.
    pub tokens: f64,
    /// Whole seconds since the Unix epoch of the last refill.
    pub last_refill_time: u64,
}

/// Shape of a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    /// Maximum tokens.
    pub capacity: f64,
    /// Tokens per second.
    pub refill_rate: f64,
}

/// Result of one consume step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeOutcome {
    /// Whether `requested` tokens were taken.
    pub allowed: bool,
    /// State to write back.
    pub state: BucketState,
}

impl BucketState {
    /// A bucket touched for the first time at `now`.
    pub fn full(params: &BucketParams, now: u64) -> Self {
        Self {
            tokens: params.capacity,
            last_refill_time: now,
        }
    }

    /// Apply time-based refill and the capacity cap.
    pub fn refilled(self, params: &BucketParams, now: u64) -> Self {
        // A clock that went backwards yields no credit.
        let elapsed = now.saturating_sub(self.last_refill_time) as f64;
        let credit = elapsed * params.refill_rate;

        let (tokens, last_refill_time) = if credit > 0f64 {
            (self.tokens + credit, now)
        } else {
            (self.tokens, self.last_refill_time)
        };

        Self {
            tokens: tokens.min(params.capacity),
            last_refill_time,
        }
    }
}

/// Refill the bucket and take `requested` tokens if they are available.
pub fn consume(
    state: Option<BucketState>,
    params: &BucketParams,
    now: u64,
    requested: f64,
) -> ConsumeOutcome {
    let mut state = state
        .unwrap_or_else(|| BucketState::full(params, now))
        .refilled(params, now);

    let allowed = state.tokens >= requested;
    if allowed {
        state.tokens -= requested;
    }

    ConsumeOutcome { allowed, state }
}

/// Tokens a consume would see at `now`, without changing anything.
pub fn inspect(state: Option<BucketState>, params: &BucketParams, now: u64) -> f64 {
    state
        .unwrap_or_else(|| BucketState::full(params, now))
        .refilled(params, now)
        .tokens
}
