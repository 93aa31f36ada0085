//! In-process fallback store for OctoGuard.
//!
//! This crate provides an in-memory implementation of the `KvStore` trait
//! from `octoguard-storage`, built on `DashMap`. It is what the store factory
//! hands out when no Redis endpoint is configured or Redis cannot be reached,
//! so it mirrors Redis semantics for every operation the trait exposes.
//!
//! # Example
//!
//! ```ignore
//! use octoguard_db_memory::InMemoryStore;
//! use octoguard_storage::KvStore;
//!
//! let store = InMemoryStore::new();
//! store.set("csrf:abc", "{}", Some(3600)).await?;
//! assert!(store.exists("csrf:abc").await?);
//! ```

pub mod storage;

pub use octoguard_storage::{KvStore, StoreError, StoreResult};
pub use storage::InMemoryStore;

/// Creates a new shareable in-memory store.
pub fn create_memory_store() -> octoguard_storage::DynStore {
    std::sync::Arc::new(InMemoryStore::new())
}
