use async_trait::async_trait;

use crate::{TollgateError, engine::BucketState};

/// Arguments of one atomic consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeArgs {
    /// Bucket capacity.
    pub capacity: f64,
    /// Tokens per second.
    pub refill_rate: f64,
    /// Current time in seconds since the Unix epoch.
    pub now: u64,
    /// Tokens to take.
    pub requested: f64,
    /// Idle expiry to set on the record.
    pub ttl_seconds: u64,
}

/// Raw reply of an atomic consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeReply {
    /// Whether the tokens were taken.
    pub allowed: bool,
    /// Tokens left after the decision.
    pub tokens: f64,
}

/// Shared storage for bucket records.
///
/// Implementations must serialize every [`BucketStore::consume`] on the same key: the
/// read-refill-decide-write sequence runs as one indivisible step, and no other operation on
/// that key observes an intermediate state. Operations on different keys carry no ordering.
///
/// `now` is passed to every operation so that stores which track expiry themselves agree with
/// the limiter's clock. Stores with server-side expiry may ignore it.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Atomically refill, decide and write back the bucket at `key`, refreshing its expiry.
    async fn consume(&self, key: &str, args: ConsumeArgs) -> Result<ConsumeReply, TollgateError>;

    /// Read the bucket at `key` without modifying it or its expiry.
    async fn fetch(&self, key: &str, now: u64) -> Result<Option<BucketState>, TollgateError>;

    /// Delete the bucket at `key`. Returns `true` if a bucket was present.
    async fn delete(&self, key: &str, now: u64) -> Result<bool, TollgateError>;

    /// Remaining idle expiry of the bucket at `key` in seconds, `None` if absent.
    async fn time_to_live(&self, key: &str, now: u64) -> Result<Option<u64>, TollgateError>;
}
