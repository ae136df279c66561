use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{
    BucketStore, ConsumeArgs, ConsumeReply, TollgateError,
    engine::{self, BucketParams, BucketState},
};

#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalBucket {
    state: Option<BucketState>,
    expires_at: u64,
}

impl LocalBucket {
    const VACANT: Self = Self {
        state: None,
        expires_at: 0,
    };

    fn live_state(&self, now: u64) -> Option<BucketState> {
        self.state.filter(|_| now < self.expires_at)
    }

    fn is_live(&self, now: u64) -> bool {
        self.live_state(now).is_some()
    }
}

/// In-process bucket store.
///
/// Holds bucket records in a [`DashMap`]. A consume holds the shard write lock of its key for
/// the whole read-refill-decide-write, so concurrent consumes on one key are serialized while
/// different keys proceed in parallel.
///
/// # Semantics & Limitations
///
/// - **Process-scoped:** state is not shared across processes. Use
///   [`RedisBucketStore`](crate::redis::RedisBucketStore) for limits shared by many instances.
/// - **Lazy expiry:** an idle record reads as absent once its expiry has passed, but it stays in
///   memory until [`LocalBucketStore::purge_expired`] runs, either explicitly or from the
///   cleanup loop.
/// - **Clones share state:** cloning the store is cheap and every clone sees the same buckets.
///
/// # Examples
///
/// ```
/// use tollgate::{TokenBucketLimiter, TokenBucketOptions, local::LocalBucketStore};
///
/// # tokio_test_block_on(async {
/// let limiter = TokenBucketLimiter::new(
///     LocalBucketStore::new(),
///     TokenBucketOptions::new(10.0, 1.0),
/// )
/// .unwrap();
///
/// let result = limiter.consume("user_123").await.unwrap();
/// assert!(result.allowed);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalBucketStore {
    buckets: Arc<DashMap<String, LocalBucket>>,
    cleanup_generation: Arc<AtomicU64>,
}

impl LocalBucketStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held in memory, expired ones included.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns `true` if no records are held in memory.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Drop every record whose idle expiry has passed at `now`.
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self, now: u64) -> usize {
        purge(&self.buckets, now)
    }

    /// Periodically purge expired records on a background task.
    ///
    /// Calling this again replaces the running loop. The loop also ends once every clone of the
    /// store has been dropped.
    ///
    /// Must be called from within the async runtime selected by the crate features.
    #[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
    #[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
    pub fn run_cleanup_loop(
        &self,
        interval: std::time::Duration,
        clock: Arc<dyn crate::Clock>,
    ) {
        let generation = self.cleanup_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current_generation = Arc::clone(&self.cleanup_generation);
        let buckets = Arc::downgrade(&self.buckets);

        crate::runtime::spawn_periodic(interval, move || {
            if current_generation.load(Ordering::SeqCst) != generation {
                return false;
            }

            let Some(buckets) = buckets.upgrade() else {
                return false;
            };

            let removed = purge(&buckets, clock.now_seconds());
            if removed > 0 {
                tracing::debug!(removed, "local.cleanup, purged expired buckets");
            }

            true
        });
    }

    /// Stop the cleanup loop, if one is running. Calling it repeatedly is harmless.
    pub fn stop_cleanup_loop(&self) {
        self.cleanup_generation.fetch_add(1, Ordering::SeqCst);
    }
}

fn purge(buckets: &DashMap<String, LocalBucket>, now: u64) -> usize {
    let before = buckets.len();
    buckets.retain(|_, bucket| bucket.is_live(now));
    before.saturating_sub(buckets.len())
}

#[async_trait]
impl BucketStore for LocalBucketStore {
    async fn consume(&self, key: &str, args: ConsumeArgs) -> Result<ConsumeReply, TollgateError> {
        let params = BucketParams {
            capacity: args.capacity,
            refill_rate: args.refill_rate,
        };

        // The entry guard keeps the shard locked until the new state is written.
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert(LocalBucket::VACANT);

        let outcome = engine::consume(
            bucket.live_state(args.now),
            &params,
            args.now,
            args.requested,
        );

        bucket.state = Some(outcome.state);
        bucket.expires_at = args.now.saturating_add(args.ttl_seconds);

        Ok(ConsumeReply {
            allowed: outcome.allowed,
            tokens: outcome.state.tokens,
        })
    }

    async fn fetch(&self, key: &str, now: u64) -> Result<Option<BucketState>, TollgateError> {
        Ok(self
            .buckets
            .get(key)
            .and_then(|bucket| bucket.live_state(now)))
    }

    async fn delete(&self, key: &str, now: u64) -> Result<bool, TollgateError> {
        Ok(self
            .buckets
            .remove(key)
            .is_some_and(|(_, bucket)| bucket.is_live(now)))
    }

    async fn time_to_live(&self, key: &str, now: u64) -> Result<Option<u64>, TollgateError> {
        Ok(self.buckets.get(key).and_then(|bucket| {
            bucket
                .is_live(now)
                .then(|| bucket.expires_at.saturating_sub(now))
        }))
    }
}
