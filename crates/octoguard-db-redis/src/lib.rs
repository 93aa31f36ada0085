//! Redis storage backend for OctoGuard.
//!
//! A thin pass-through from the `KvStore` trait to Redis commands, plus:
//!
//! - a connected/disconnected flag driven by command outcomes
//! - capped exponential backoff with a hard attempt ceiling
//! - native atomic get-and-delete (`GETDEL`) for single-use tokens
//!
//! Construction errors are returned to the caller. Choosing the in-process
//! fallback when Redis is unavailable is the store factory's job, not this
//! crate's.

pub mod config;
pub mod retry;
pub mod storage;

pub use config::RedisConfig;
pub use retry::{BackoffPolicy, MAX_BACKOFF};
pub use storage::RedisStore;
