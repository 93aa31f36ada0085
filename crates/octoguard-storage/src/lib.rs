//! # octoguard-storage
//!
//! Store abstraction for OctoGuard's ephemeral security state.
//!
//! This crate defines the [`KvStore`] trait that every backend implements, the
//! shared error type and a few helpers both backends rely on to behave the
//! same way. It contains no backend itself:
//!
//! - `octoguard-db-memory` - in-process fallback with lazy expiry
//! - `octoguard-db-redis` - Redis adapter with bounded reconnection
//!
//! ## Example
//!
//! ```ignore
//! use octoguard_storage::{DynStore, StoreResult};
//!
//! async fn remember(store: &DynStore, ip: &str) -> StoreResult<i64> {
//!     let key = format!("violations:{ip}");
//!     let count = store.increment(&key).await?;
//!     store.expire(&key, 3600).await?;
//!     Ok(count)
//! }
//! ```

pub mod clock;
mod error;
pub mod pattern;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ErrorCategory, StoreError};
pub use pattern::KeyPattern;
pub use traits::{BackendKind, KvStore, MAX_TTL_SECS, validate_ttl};

/// Type alias for a store result.
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle to whichever backend was constructed.
pub type DynStore = std::sync::Arc<dyn KvStore>;
