use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, Value};

use crate::{
    BucketStore, ConsumeArgs, ConsumeReply, TollgateError,
    engine::BucketState,
    redis::{RedisConnectionPool, registered_script::RegisteredScript},
};

const TOKENS_FIELD: &str = "tokens";
const TIMESTAMP_FIELD: &str = "timestamp";

/// Transcription of [`engine::consume`](crate::engine::consume) executed inside Redis.
///
/// Numbers go over the wire as decimal strings: `%.17g` round-trips an IEEE double exactly,
/// while returning a Lua number would truncate it to an integer reply. A record with a missing
/// or unparsable field is refused with an error reply rather than replaced by a full bucket.
const CONSUME_SCRIPT: &str = r#"
    local key = KEYS[1]

    local capacity = tonumber(ARGV[1])
    local refill_rate = tonumber(ARGV[2])
    local now = tonumber(ARGV[3])
    local requested = tonumber(ARGV[4])

    local state = redis.call("HMGET", key, "tokens", "timestamp")
    local tokens
    local last_refill_time

    if not state[1] and not state[2] then
        tokens = capacity
        last_refill_time = now
    else
        tokens = tonumber(state[1])

        if tokens == nil or tokens ~= tokens or tokens == math.huge or tokens == -math.huge
            or not state[2] or not string.match(state[2], "^%d+$") then
            return redis.error_reply("ERR corrupt bucket record at " .. key)
        end

        last_refill_time = tonumber(state[2])
    end

    local elapsed = math.max(0, now - last_refill_time)
    local credit = elapsed * refill_rate

    if credit > 0 then
        tokens = tokens + credit
        last_refill_time = now
    end

    tokens = math.min(tokens, capacity)

    local allowed = 0
    if tokens >= requested then
        tokens = tokens - requested
        allowed = 1
    end

    local encoded_tokens = string.format("%.17g", tokens)

    redis.call("HSET", key, "tokens", encoded_tokens, "timestamp", string.format("%d", last_refill_time))
    redis.call("EXPIRE", key, ARGV[5])

    return {allowed, encoded_tokens}
"#;

/// Bucket store backed by Redis.
///
/// Each bucket is a hash with the fields `tokens` and `timestamp`. Consumes run as one Lua
/// script, which Redis executes without interleaving any other command, so every instance
/// sharing the server observes a single linearized history per key.
///
/// # Requirements
///
/// - **Redis:** >= 4.0 (multi-field `HSET`)
/// - **Runtime:** Tokio or Smol (via `redis-tokio` or `redis-smol` features)
///
/// # Examples
///
/// ```no_run
/// use tollgate::{TokenBucketLimiter, TokenBucketOptions};
/// use tollgate::redis::{RedisBucketStore, RedisConnectionPool};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let client = redis::Client::open("redis://127.0.0.1:6379/")?;
/// let pool = RedisConnectionPool::from_client(client, 4).await?;
///
/// let limiter = TokenBucketLimiter::new(
///     RedisBucketStore::new(pool),
///     TokenBucketOptions::new(100.0, 10.0).with_prefix("api"),
/// )?;
///
/// if !limiter.consume("user_123").await?.allowed {
///     // reply with 429
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RedisBucketStore {
    pool: RedisConnectionPool,
    consume_script: Arc<RegisteredScript>,
}

impl RedisBucketStore {
    /// Create a store over a connection manager or a pool of them.
    ///
    /// Clones of the returned store share one script registration.
    pub fn new(pool: impl Into<RedisConnectionPool>) -> Self {
        Self {
            pool: pool.into(),
            consume_script: Arc::new(RegisteredScript::new("consume", CONSUME_SCRIPT)),
        }
    }

    /// Load the consume script now instead of on first use.
    pub async fn prepare(&self) -> Result<(), TollgateError> {
        let mut connection_manager = self.pool.get();
        self.consume_script
            .register(&mut connection_manager)
            .await
            .map(|_| ())
    }

    #[cfg(test)]
    pub(crate) fn consume_script_handle(&self) -> Option<Arc<str>> {
        self.consume_script.handle()
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn consume(&self, key: &str, args: ConsumeArgs) -> Result<ConsumeReply, TollgateError> {
        let mut connection_manager = self.pool.get();

        let reply = self
            .consume_script
            .invoke(
                &mut connection_manager,
                key,
                &(
                    args.capacity,
                    args.refill_rate,
                    args.now,
                    args.requested,
                    args.ttl_seconds,
                ),
            )
            .await?;

        parse_consume_reply(reply)
    }

    async fn fetch(&self, key: &str, _now: u64) -> Result<Option<BucketState>, TollgateError> {
        let mut connection_manager = self.pool.get();

        let (tokens, timestamp): (Option<String>, Option<String>) = redis::cmd("HMGET")
            .arg(key)
            .arg(TOKENS_FIELD)
            .arg(TIMESTAMP_FIELD)
            .query_async(&mut connection_manager)
            .await?;

        parse_bucket_fields(tokens, timestamp)
    }

    async fn delete(&self, key: &str, _now: u64) -> Result<bool, TollgateError> {
        let mut connection_manager = self.pool.get();
        let removed: u64 = connection_manager.del(key).await?;

        Ok(removed > 0)
    }

    async fn time_to_live(&self, key: &str, _now: u64) -> Result<Option<u64>, TollgateError> {
        let mut connection_manager = self.pool.get();
        let ttl: i64 = connection_manager.ttl(key).await?;

        // -2: no such key. -1: key without expiry, which this crate never writes.
        Ok(u64::try_from(ttl).ok())
    }
}

pub(crate) fn parse_consume_reply(reply: Value) -> Result<ConsumeReply, TollgateError> {
    let Value::Array(items) = &reply else {
        return Err(TollgateError::operation_failed(format!(
            "unexpected consume reply: {reply:?}"
        )));
    };

    let [allowed, tokens] = items.as_slice() else {
        return Err(TollgateError::operation_failed(format!(
            "consume reply has {} elements, expected 2",
            items.len()
        )));
    };

    let allowed = match allowed {
        Value::Int(1) => true,
        Value::Int(0) => false,
        other => {
            return Err(TollgateError::operation_failed(format!(
                "unexpected allowed flag in consume reply: {other:?}"
            )));
        }
    };

    let tokens = match tokens {
        Value::BulkString(bytes) => parse_tokens(&String::from_utf8_lossy(bytes))?,
        Value::SimpleString(text) => parse_tokens(text)?,
        Value::Int(n) => *n as f64,
        other => {
            return Err(TollgateError::operation_failed(format!(
                "unexpected token count in consume reply: {other:?}"
            )));
        }
    };

    Ok(ConsumeReply { allowed, tokens })
}

pub(crate) fn parse_bucket_fields(
    tokens: Option<String>,
    timestamp: Option<String>,
) -> Result<Option<BucketState>, TollgateError> {
    let (tokens, timestamp) = match (tokens, timestamp) {
        (None, None) => return Ok(None),
        (Some(tokens), Some(timestamp)) => (tokens, timestamp),
        (tokens, timestamp) => {
            return Err(TollgateError::operation_failed(format!(
                "incomplete bucket record: tokens={tokens:?} timestamp={timestamp:?}"
            )));
        }
    };

    let last_refill_time = timestamp.trim().parse::<u64>().map_err(|err| {
        TollgateError::operation_failed(format!("invalid bucket timestamp {timestamp:?}: {err}"))
    })?;

    Ok(Some(BucketState {
        tokens: parse_tokens(&tokens)?,
        last_refill_time,
    }))
}

fn parse_tokens(text: &str) -> Result<f64, TollgateError> {
    match text.trim().parse::<f64>() {
        Ok(tokens) if tokens.is_finite() => Ok(tokens),
        Ok(_) => Err(TollgateError::operation_failed(format!(
            "non-finite token count {text:?}"
        ))),
        Err(err) => Err(TollgateError::operation_failed(format!(
            "invalid token count {text:?}: {err}"
        ))),
    }
}
