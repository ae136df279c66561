//! In-process bucket store.
//!
//! The local store keeps bucket records inside the current process, in a
//! [`DashMap`](dashmap::DashMap). It follows the same token-bucket rules as the Redis store and
//! gives the same per-key atomicity, so a limiter behaves identically on either backend.
//!
//! # When to Use
//!
//! ✅ **Use the local store when:**
//! - A single process owns the limit
//! - Tests need a deterministic store (pair it with [`ManualClock`](crate::ManualClock))
//! - No Redis is available
//!
//! ❌ **Don't use the local store when:**
//! - Several instances must share one limit
//! - Limits must survive process restarts

mod local_bucket_store;
pub use local_bucket_store::*;
