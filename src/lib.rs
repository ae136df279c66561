#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod token_bucket_limiter;
pub use token_bucket_limiter::*;

pub mod engine;

mod store;
pub use store::*;

mod clock;
pub use clock::*;

pub mod local;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
#[cfg_attr(docsrs, doc(cfg(any(feature = "redis-tokio", feature = "redis-smol"))))]
pub mod redis;

#[cfg(any(feature = "redis-tokio", feature = "redis-smol"))]
mod runtime;

mod error;
pub use error::*;

mod common;
pub use common::{
    BucketStatus, Capacity, ConsumeResult, KeyPrefix, RefillRate, TokenCount, TtlSeconds,
};

#[cfg(test)]
mod tests;
