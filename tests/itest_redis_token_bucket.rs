#![cfg(any(feature = "redis-tokio", feature = "redis-smol"))]

use std::{
    env,
    sync::Arc,
    time::{Duration, SystemTime},
};

use tollgate::redis::{RedisBucketStore, RedisConnectionPool};
use tollgate::{TokenBucketLimiter, TokenBucketOptions, TollgateError};

fn redis_url() -> Option<String> {
    env::var("REDIS_URL").ok()
}

fn unique_prefix() -> String {
    let n: u64 = rand::random();
    format!("tollgate_itest_{n}")
}

async fn build_limiter(
    url: &str,
    capacity: f64,
    refill_rate: f64,
) -> Arc<TokenBucketLimiter<RedisBucketStore>> {
    let client = redis::Client::open(url).unwrap();
    let pool = RedisConnectionPool::from_client(client, 4).await.unwrap();

    Arc::new(
        TokenBucketLimiter::new(
            RedisBucketStore::new(pool),
            TokenBucketOptions::new(capacity, refill_rate).with_prefix(unique_prefix()),
        )
        .unwrap(),
    )
}

async fn drain(limiter: &TokenBucketLimiter<RedisBucketStore>, client_id: &str) -> usize {
    let mut allowed = 0;
    while limiter.consume(client_id).await.unwrap().allowed {
        allowed += 1;
    }
    allowed
}

#[test]
fn zero_refill_allows_exactly_capacity() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_limiter(&url, 4f64, 0f64).await;

        for expected in [3f64, 2f64, 1f64, 0f64] {
            let result = rl.consume("k").await.unwrap();
            assert!(result.allowed);
            assert_eq!(result.remaining_tokens, expected);
        }

        for _ in 0..3 {
            let result = rl.consume("k").await.unwrap();
            assert!(!result.allowed);
            assert_eq!(result.remaining_tokens, 0f64);
            assert_eq!(result.retry_after, Some(Duration::ZERO));
        }

        let status = rl.status("k").await.unwrap();
        assert_eq!(status.remaining_tokens, 0);
        assert_eq!(status.reset_time, None);
    });
}

#[test]
fn drained_bucket_refills_after_waiting() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_limiter(&url, 5f64, 1f64).await;

        assert_eq!(drain(&rl, "k").await, 5);

        tokio::time::sleep(Duration::from_millis(2000)).await;

        // Whole-second timestamps: two or three seconds may have been credited.
        let refilled = drain(&rl, "k").await;
        assert!((2..=3).contains(&refilled), "refilled {refilled}");
    });
}

#[test]
fn long_idle_is_capped_at_capacity() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_limiter(&url, 5f64, 2f64).await;

        for _ in 0..3 {
            assert!(rl.consume("k").await.unwrap().allowed);
        }

        tokio::time::sleep(Duration::from_millis(5100)).await;

        assert_eq!(drain(&rl, "k").await, 5);
    });
}

#[test]
fn per_client_state_is_independent() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_limiter(&url, 2f64, 0f64).await;

        assert_eq!(drain(&rl, "a").await, 2);

        let b = rl.consume("b").await.unwrap();
        assert!(b.allowed);
        assert_eq!(b.remaining_tokens, 1f64);
    });
}

#[test]
fn status_never_consumes() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_limiter(&url, 3f64, 1f64).await;

        for _ in 0..5 {
            let status = rl.status("k").await.unwrap();
            assert_eq!(status.remaining_tokens, 3);
            assert_eq!(status.capacity, 3f64);
            assert!(status.reset_time.unwrap() <= SystemTime::now() + Duration::from_secs(1));
        }

        assert_eq!(rl.idle_expiry("k").await.unwrap(), None);
        assert_eq!(drain(&rl, "k").await, 3);

        let ttl = rl.idle_expiry("k").await.unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(rl.config().ttl_seconds()));
    });
}

#[test]
fn reset_round_trip() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_limiter(&url, 3f64, 0f64).await;

        assert!(!rl.reset("never-touched").await.unwrap());

        assert_eq!(drain(&rl, "k").await, 3);
        assert!(rl.reset("k").await.unwrap());
        assert_eq!(drain(&rl, "k").await, 3);
    });
}

#[test]
fn batch_boundaries() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async {
        let rl = build_limiter(&url, 5f64, 1f64).await;

        for count in [6f64, 0f64, -2f64] {
            assert!(matches!(
                rl.consume_batch("k", count).await,
                Err(TollgateError::InvalidConfiguration(_))
            ));
        }
        assert_eq!(rl.idle_expiry("k").await.unwrap(), None);

        let result = rl.consume_batch("k", 5f64).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining_tokens, 0f64);
    });
}

#[test]
fn concurrent_consumes_allow_exactly_capacity() {
    let Some(url) = redis_url() else {
        return;
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let rl = build_limiter(&url, 10f64, 0f64).await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let rl = Arc::clone(&rl);
                tokio::spawn(async move { rl.consume("hot").await.unwrap() })
            })
            .collect();

        let mut allowed_remaining = Vec::new();
        let mut denied = 0;

        for handle in handles {
            let result = handle.await.unwrap();
            if result.allowed {
                allowed_remaining.push(result.remaining_tokens as u64);
            } else {
                denied += 1;
            }
        }

        allowed_remaining.sort_unstable();
        assert_eq!(allowed_remaining, (0..10).collect::<Vec<u64>>());
        assert_eq!(denied, 10);
    });
}
