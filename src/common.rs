use std::{
    ops::Deref,
    sync::Arc,
    time::{Duration, SystemTime},
};

use crate::TollgateError;

/// Idle expiry used when the bucket never refills.
pub(crate) const NEVER_REFILLING_TTL_SECONDS: u64 = 3600;

/// Slack added on top of the time a bucket needs to refill twice over.
pub(crate) const DEFAULT_TTL_SLACK_SECONDS: u64 = 60;

/// Maximum number of tokens a bucket can hold (its burst size).
///
/// Must be finite and greater than 0.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Capacity(f64);

impl Deref for Capacity {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for Capacity {
    type Error = TollgateError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value <= 0f64 {
            Err(TollgateError::invalid_configuration(
                "capacity must be a finite number greater than 0",
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Tokens added to a bucket per second.
///
/// Must be finite and not negative. A rate of `0` produces buckets that never refill.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct RefillRate(f64);

impl RefillRate {
    /// Returns `true` when buckets never refill.
    pub fn is_zero(&self) -> bool {
        self.0 == 0f64
    }
}

impl Deref for RefillRate {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for RefillRate {
    type Error = TollgateError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value < 0f64 {
            Err(TollgateError::invalid_configuration(
                "refill rate must be a finite number greater than or equal to 0",
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Idle expiry of a bucket record, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TtlSeconds(u64);

impl TtlSeconds {
    /// Largest accepted expiry.
    ///
    /// Redis converts `EXPIRE` seconds to absolute milliseconds in a signed 64-bit integer and
    /// rejects anything that overflows; this bound stays well inside that range and inside the
    /// integers a Lua number represents exactly.
    pub const MAX: Self = Self(1_000_000_000_000_000);

    /// Expiry derived from the bucket shape: `ceil(2 * capacity / refill_rate) + 60`,
    /// or one hour when the bucket never refills. Clamped to [`TtlSeconds::MAX`].
    pub fn derived(capacity: Capacity, refill_rate: RefillRate) -> Self {
        if refill_rate.is_zero() {
            return Self(NEVER_REFILLING_TTL_SECONDS);
        }

        // `as` saturates on overflow, so absurdly slow rates clamp instead of wrapping.
        let refill_seconds = (2f64 * *capacity / *refill_rate).ceil() as u64;
        Self(
            refill_seconds
                .saturating_add(DEFAULT_TTL_SLACK_SECONDS)
                .min(Self::MAX.0),
        )
    }
}

impl Deref for TtlSeconds {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for TtlSeconds {
    type Error = TollgateError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(TollgateError::invalid_configuration(
                "ttl seconds must be greater than 0",
            ))
        } else if value > Self::MAX.0 {
            Err(TollgateError::invalid_configuration(format!(
                "ttl seconds must not exceed {}",
                Self::MAX.0
            )))
        } else {
            Ok(Self(value))
        }
    }
}

/// Number of tokens requested by a batch consume.
///
/// Must be finite and greater than 0. Whether it fits the bucket is checked by the limiter.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct TokenCount(f64);

impl TokenCount {
    pub(crate) fn one() -> Self {
        Self(1f64)
    }
}

impl Deref for TokenCount {
    type Target = f64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<f64> for TokenCount {
    type Error = TollgateError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value <= 0f64 {
            Err(TollgateError::invalid_configuration(
                "token count must be a finite number greater than 0",
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Validated namespace for bucket keys.
///
/// Bucket keys have the shape `<prefix>:<client id>`. The prefix must not be empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyPrefix(Arc<str>);

impl KeyPrefix {
    /// Prefix used when none is configured.
    pub fn default_prefix() -> Self {
        Self(Arc::from("tollgate"))
    }

    /// Composite storage key for `client_id`.
    pub fn bucket_key(&self, client_id: &str) -> String {
        format!("{}:{}", self.0, client_id)
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self::default_prefix()
    }
}

impl Deref for KeyPrefix {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for KeyPrefix {
    type Error = TollgateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(TollgateError::invalid_configuration(
                "key prefix must not be empty",
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for KeyPrefix {
    type Error = TollgateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

/// Outcome of a consume or batch consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeResult {
    /// Whether the requested tokens were taken.
    pub allowed: bool,

    /// Tokens left in the bucket after the decision, fractional credit included.
    ///
    /// Reported for denials too.
    pub remaining_tokens: f64,

    /// Time until enough tokens will have accrued, set only on denial.
    ///
    /// [`Duration::ZERO`] on a denial means the bucket never refills: the caller should treat
    /// it as a denial that lasts until the bucket is reset.
    pub retry_after: Option<Duration>,
}

/// Read-only view of a bucket, as a consume would see it right now.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketStatus {
    /// Available tokens, truncated toward zero.
    pub remaining_tokens: u64,

    /// Configured capacity.
    pub capacity: f64,

    /// When the bucket will be full again, `None` when it never refills.
    pub reset_time: Option<SystemTime>,
}
