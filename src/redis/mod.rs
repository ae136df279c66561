//! Redis-backed bucket store.
//!
//! Buckets live in Redis so that every service instance pointed at the same server enforces
//! one shared limit. Consumes execute as a Lua script registered once per store and invoked by
//! SHA afterwards; inspection, reset and expiry queries are single commands.
//!
//! # Consistency Semantics
//!
//! - **Atomic consumes:** Redis runs the script without interleaving other commands, so two
//!   consumes on one key never read the same state
//! - **Independent keys:** different client ids carry no ordering relative to each other
//! - **No fallback:** a failed round-trip surfaces as
//!   [`TollgateError::OperationFailed`](crate::TollgateError::OperationFailed); the store never
//!   guesses a decision

mod common;
pub use common::*;

mod redis_bucket_store;
pub use redis_bucket_store::*;

mod registered_script;
