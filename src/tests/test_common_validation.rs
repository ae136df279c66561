use crate::{
    Capacity, KeyPrefix, RefillRate, TokenBucketLimiter, TokenBucketOptions, TokenCount,
    TollgateError, TtlSeconds, local::LocalBucketStore,
};

fn configuration_message(err: TollgateError) -> String {
    match err {
        TollgateError::InvalidConfiguration(message) => message,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

#[test]
fn capacity_try_from_validates_positive_finite() {
    assert_eq!(*Capacity::try_from(2.5).unwrap(), 2.5);

    for value in [0f64, -1f64, f64::NAN, f64::INFINITY] {
        assert_eq!(
            configuration_message(Capacity::try_from(value).unwrap_err()),
            "capacity must be a finite number greater than 0"
        );
    }
}

#[test]
fn refill_rate_try_from_allows_zero() {
    assert!(RefillRate::try_from(0f64).unwrap().is_zero());
    assert_eq!(*RefillRate::try_from(0.25).unwrap(), 0.25);

    for value in [-0.5, f64::NAN, f64::INFINITY] {
        assert_eq!(
            configuration_message(RefillRate::try_from(value).unwrap_err()),
            "refill rate must be a finite number greater than or equal to 0"
        );
    }
}

#[test]
fn ttl_seconds_try_from_validates_nonzero() {
    assert_eq!(*TtlSeconds::try_from(1u64).unwrap(), 1);

    assert_eq!(
        configuration_message(TtlSeconds::try_from(0u64).unwrap_err()),
        "ttl seconds must be greater than 0"
    );
}

#[test]
fn ttl_seconds_try_from_rejects_values_beyond_max() {
    assert_eq!(*TtlSeconds::try_from(*TtlSeconds::MAX).unwrap(), 1_000_000_000_000_000);

    for value in [*TtlSeconds::MAX + 1, u64::MAX] {
        assert_eq!(
            configuration_message(TtlSeconds::try_from(value).unwrap_err()),
            "ttl seconds must not exceed 1000000000000000"
        );
    }
}

#[test]
fn ttl_seconds_derived_from_bucket_shape() {
    let derived = |capacity: f64, refill_rate: f64| {
        *TtlSeconds::derived(
            Capacity::try_from(capacity).unwrap(),
            RefillRate::try_from(refill_rate).unwrap(),
        )
    };

    assert_eq!(derived(10f64, 1f64), 80);
    assert_eq!(derived(5f64, 2f64), 65);
    assert_eq!(derived(1f64, 3f64), 61);
    assert_eq!(derived(7f64, 0f64), 3600);
    assert_eq!(derived(f64::MAX, f64::MIN_POSITIVE), *TtlSeconds::MAX);
    assert_eq!(derived(1000f64, 1e-13), *TtlSeconds::MAX);
}

#[test]
fn token_count_try_from_validates_positive_finite() {
    assert_eq!(*TokenCount::try_from(0.5).unwrap(), 0.5);

    for value in [0f64, -3f64, f64::NAN, f64::NEG_INFINITY] {
        assert_eq!(
            configuration_message(TokenCount::try_from(value).unwrap_err()),
            "token count must be a finite number greater than 0"
        );
    }
}

#[test]
fn key_prefix_rejects_empty_and_builds_keys() {
    assert_eq!(
        configuration_message(KeyPrefix::try_from("").unwrap_err()),
        "key prefix must not be empty"
    );

    let prefix = KeyPrefix::try_from("api:v1").unwrap();
    assert_eq!(prefix.bucket_key("user_1"), "api:v1:user_1");
    assert_eq!(&*KeyPrefix::default(), "tollgate");
}

#[test]
fn limiter_construction_fails_fast_on_invalid_options() {
    let cases = [
        TokenBucketOptions::new(0f64, 1f64),
        TokenBucketOptions::new(-5f64, 1f64),
        TokenBucketOptions::new(5f64, -1f64),
        TokenBucketOptions::new(5f64, 1f64).with_prefix(""),
        TokenBucketOptions::new(5f64, 1f64).with_ttl_seconds(0),
        TokenBucketOptions::new(5f64, 1f64).with_ttl_seconds(u64::MAX),
    ];

    for options in cases {
        let err = TokenBucketLimiter::new(LocalBucketStore::new(), options.clone()).unwrap_err();
        assert!(err.is_configuration(), "{options:?} gave {err:?}");
    }
}

#[test]
fn limiter_config_reports_resolved_defaults() {
    let limiter =
        TokenBucketLimiter::new(LocalBucketStore::new(), TokenBucketOptions::new(5f64, 2f64))
            .unwrap();

    let config = limiter.config();
    assert_eq!(config.capacity(), 5f64);
    assert_eq!(config.refill_rate(), 2f64);
    assert_eq!(config.prefix(), "tollgate");
    assert_eq!(config.ttl_seconds(), 65);
}

#[test]
fn limiter_config_clamps_derived_ttl_for_slow_refill() {
    let limiter = TokenBucketLimiter::new(
        LocalBucketStore::new(),
        TokenBucketOptions::new(1000f64, 1e-13),
    )
    .unwrap();

    assert_eq!(limiter.config().ttl_seconds(), *TtlSeconds::MAX);
}

#[test]
fn limiter_config_keeps_explicit_values() {
    let limiter = TokenBucketLimiter::new(
        LocalBucketStore::new(),
        TokenBucketOptions::new(5f64, 0f64)
            .with_prefix("login")
            .with_ttl_seconds(30),
    )
    .unwrap();

    assert_eq!(limiter.config().prefix(), "login");
    assert_eq!(limiter.config().ttl_seconds(), 30);
    assert_eq!(limiter.bucket_key("alice"), "login:alice");
}
