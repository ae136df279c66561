//! Typed entrypoint over a [`BucketStore`].

use std::{
    sync::Arc,
    time::{Duration, UNIX_EPOCH},
};

use crate::{
    BucketStatus, BucketStore, Capacity, Clock, ConsumeArgs, ConsumeResult, KeyPrefix,
    RefillRate, SystemClock, TokenCount, TollgateError, TtlSeconds,
    engine::{self, BucketParams},
};

/// Options for [`TokenBucketLimiter`].
///
/// Values are checked by [`TokenBucketLimiter::new`], which fails fast on the first invalid
/// one.
///
/// # Examples
///
/// ```
/// use tollgate::TokenBucketOptions;
///
/// // 100 token burst, 10 tokens per second, keys like "api:<client id>".
/// let options = TokenBucketOptions::new(100.0, 10.0)
///     .with_prefix("api")
///     .with_ttl_seconds(600);
/// ```
#[derive(Clone, Debug)]
pub struct TokenBucketOptions {
    /// Maximum tokens per bucket (burst size). Must be finite and greater than 0.
    pub capacity: f64,

    /// Tokens added per second. Must be finite and not negative; `0` disables refill.
    pub refill_rate: f64,

    /// Key namespace. Buckets are stored at `<prefix>:<client id>`.
    ///
    /// Must not be empty. Defaults to `"tollgate"`.
    pub prefix: Option<String>,

    /// Idle expiry of bucket records in seconds. Must be greater than 0.
    ///
    /// Defaults to `ceil(2 * capacity / refill_rate) + 60`, or one hour when `refill_rate` is
    /// `0`.
    pub ttl_seconds: Option<u64>,

    /// Time source. Defaults to [`SystemClock`].
    pub clock: Arc<dyn Clock>,
}

impl TokenBucketOptions {
    /// Options with the given bucket shape and defaults for everything else.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            prefix: None,
            ttl_seconds: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Set the key namespace.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set an explicit idle expiry.
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    /// Set the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Configuration a limiter actually runs with, defaults resolved.
///
/// Created once by [`TokenBucketLimiter::new`] and never changed afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectiveConfig {
    capacity: Capacity,
    refill_rate: RefillRate,
    prefix: KeyPrefix,
    ttl_seconds: TtlSeconds,
}

impl EffectiveConfig {
    fn resolve(options: &TokenBucketOptions) -> Result<Self, TollgateError> {
        let capacity = Capacity::try_from(options.capacity)?;
        let refill_rate = RefillRate::try_from(options.refill_rate)?;

        let prefix = match &options.prefix {
            Some(prefix) => KeyPrefix::try_from(prefix.as_str())?,
            None => KeyPrefix::default_prefix(),
        };

        let ttl_seconds = match options.ttl_seconds {
            Some(ttl_seconds) => TtlSeconds::try_from(ttl_seconds)?,
            None => TtlSeconds::derived(capacity, refill_rate),
        };

        Ok(Self {
            capacity,
            refill_rate,
            prefix,
            ttl_seconds,
        })
    }

    /// Maximum tokens per bucket.
    pub fn capacity(&self) -> f64 {
        *self.capacity
    }

    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        *self.refill_rate
    }

    /// Key namespace.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Idle expiry of bucket records in seconds.
    pub fn ttl_seconds(&self) -> u64 {
        *self.ttl_seconds
    }

    fn params(&self) -> BucketParams {
        BucketParams {
            capacity: *self.capacity,
            refill_rate: *self.refill_rate,
        }
    }
}

/// Token-bucket rate limiter over a shared [`BucketStore`].
///
/// Every client id owns one bucket holding up to `capacity` tokens, refilled at
/// `refill_rate` tokens per second. A request takes one token (or `n` for a batch) and is
/// denied when not enough are left. All coordination happens in the store, so any number of
/// limiters, in any number of processes, can share buckets through one store.
///
/// # Semantics
///
/// - **Lazy creation:** a bucket does not exist until first touched, and starts full
/// - **Denials commit refill:** a denied consume still persists accrued credit and refreshes
///   the idle expiry
/// - **Exact credit:** fractional tokens carry over between calls; only [`status`] truncates
/// - **No fallback:** store failures are returned as
///   [`TollgateError::OperationFailed`]; the limiter never decides on its own
///
/// [`status`]: TokenBucketLimiter::status
///
/// # Examples
///
/// ```
/// use tollgate::{TokenBucketLimiter, TokenBucketOptions, local::LocalBucketStore};
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let limiter = TokenBucketLimiter::new(
///     LocalBucketStore::new(),
///     TokenBucketOptions::new(2.0, 0.0).with_prefix("login"),
/// )
/// .unwrap();
///
/// assert!(limiter.consume("alice").await.unwrap().allowed);
/// assert!(limiter.consume("alice").await.unwrap().allowed);
///
/// let denied = limiter.consume("alice").await.unwrap();
/// assert!(!denied.allowed);
/// assert_eq!(denied.remaining_tokens, 0.0);
///
/// assert!(limiter.reset("alice").await.unwrap());
/// assert!(limiter.consume("alice").await.unwrap().allowed);
/// # });
/// ```
#[derive(Debug)]
pub struct TokenBucketLimiter<S> {
    store: S,
    config: EffectiveConfig,
    clock: Arc<dyn Clock>,
}

impl<S: BucketStore> TokenBucketLimiter<S> {
    /// Create a limiter, validating `options`.
    ///
    /// Fails with [`TollgateError::InvalidConfiguration`] when the capacity is not positive,
    /// the refill rate is negative, the prefix is empty, or an explicit ttl is 0. The store is
    /// not contacted.
    pub fn new(store: S, options: TokenBucketOptions) -> Result<Self, TollgateError> {
        let config = EffectiveConfig::resolve(&options)?;

        Ok(Self {
            store,
            config,
            clock: options.clock,
        })
    }

    /// The effective configuration.
    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Storage key of `client_id`'s bucket.
    pub fn bucket_key(&self, client_id: &str) -> String {
        self.config.prefix.bucket_key(client_id)
    }

    /// Take one token from `client_id`'s bucket.
    ///
    /// On denial, `retry_after` is the whole number of seconds until one token will have
    /// accrued, or zero when the bucket never refills.
    pub async fn consume(&self, client_id: &str) -> Result<ConsumeResult, TollgateError> {
        self.take(client_id, TokenCount::one()).await
    }

    /// Take `count` tokens from `client_id`'s bucket, all or nothing.
    ///
    /// `count` must be finite, greater than 0 and no larger than the capacity; otherwise
    /// [`TollgateError::InvalidConfiguration`] is returned without contacting the store.
    pub async fn consume_batch(
        &self,
        client_id: &str,
        count: f64,
    ) -> Result<ConsumeResult, TollgateError> {
        let count = TokenCount::try_from(count)?;

        if *count > self.config.capacity() {
            return Err(TollgateError::invalid_configuration(format!(
                "token count {} exceeds capacity {}",
                *count,
                self.config.capacity()
            )));
        }

        self.take(client_id, count).await
    }

    async fn take(
        &self,
        client_id: &str,
        count: TokenCount,
    ) -> Result<ConsumeResult, TollgateError> {
        let key = self.bucket_key(client_id);
        let args = ConsumeArgs {
            capacity: self.config.capacity(),
            refill_rate: self.config.refill_rate(),
            now: self.clock.now_seconds(),
            requested: *count,
            ttl_seconds: self.config.ttl_seconds(),
        };

        let reply = self
            .store
            .consume(&key, args)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, key = %key, "bucket.consume.error"))?;

        if reply.allowed {
            tracing::trace!(key = %key, remaining = reply.tokens, "bucket.consume.allowed");

            return Ok(ConsumeResult {
                allowed: true,
                remaining_tokens: reply.tokens,
                retry_after: None,
            });
        }

        let retry_after = self.retry_after(reply.tokens, *count);
        tracing::debug!(
            key = %key,
            remaining = reply.tokens,
            requested = *count,
            retry_after_secs = retry_after.as_secs(),
            "bucket.consume.denied"
        );

        Ok(ConsumeResult {
            allowed: false,
            remaining_tokens: reply.tokens,
            retry_after: Some(retry_after),
        })
    }

    fn retry_after(&self, remaining: f64, requested: f64) -> Duration {
        if self.config.refill_rate.is_zero() {
            return Duration::ZERO;
        }

        let seconds = ((requested - remaining) / self.config.refill_rate()).ceil();
        Duration::from_secs(seconds.max(0f64) as u64)
    }

    /// Inspect `client_id`'s bucket without consuming or refreshing its expiry.
    ///
    /// `remaining_tokens` is what a consume would see right now, truncated toward zero. An
    /// untouched bucket reports full capacity.
    pub async fn status(&self, client_id: &str) -> Result<BucketStatus, TollgateError> {
        let key = self.bucket_key(client_id);
        let now = self.clock.now_seconds();

        let state = self
            .store
            .fetch(&key, now)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, key = %key, "bucket.status.error"))?;

        let params = self.config.params();
        let remaining_tokens = engine::inspect(state, &params, now).floor().max(0f64) as u64;

        let reset_time = if self.config.refill_rate.is_zero() {
            None
        } else {
            let seconds_to_full =
                (params.capacity - remaining_tokens as f64).max(0f64) / params.refill_rate;

            Duration::try_from_secs_f64(now as f64 + seconds_to_full)
                .ok()
                .and_then(|since_epoch| UNIX_EPOCH.checked_add(since_epoch))
        };

        Ok(BucketStatus {
            remaining_tokens,
            capacity: params.capacity,
            reset_time,
        })
    }

    /// Delete `client_id`'s bucket. Returns `true` if it existed.
    ///
    /// The next consume starts from a full bucket.
    pub async fn reset(&self, client_id: &str) -> Result<bool, TollgateError> {
        let key = self.bucket_key(client_id);
        let now = self.clock.now_seconds();

        let removed = self
            .store
            .delete(&key, now)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, key = %key, "bucket.reset.error"))?;

        tracing::debug!(key = %key, removed, "bucket.reset");

        Ok(removed)
    }

    /// Time until `client_id`'s bucket expires if left idle, `None` when it does not exist.
    pub async fn idle_expiry(&self, client_id: &str) -> Result<Option<Duration>, TollgateError> {
        let key = self.bucket_key(client_id);
        let now = self.clock.now_seconds();

        let ttl = self
            .store
            .time_to_live(&key, now)
            .await
            .inspect_err(|err| tracing::error!(error = ?err, key = %key, "bucket.ttl.error"))?;

        Ok(ttl.map(Duration::from_secs))
    }
}

