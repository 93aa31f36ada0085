//! The store contract every backend implements.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;

use crate::StoreResult;

/// Which implementation sits behind a [`KvStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Shared Redis cache reached over the network.
    Networked,
    /// In-process map used when no cache service is available.
    Fallback,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Networked => write!(f, "networked"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Key-value and list store with per-key TTLs.
///
/// Both implementations must be observably identical for every operation
/// below: a key past its expiry is absent on every read, `increment` keeps
/// an existing TTL, list indices are inclusive and negative indices count
/// from the end, and a scalar operation on a list key (or the reverse)
/// fails with [`StoreError::WrongType`](crate::StoreError::WrongType).
///
/// TTLs are whole seconds and must be greater than zero.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if it is missing or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` under `key`, replacing whatever was there.
    ///
    /// `ttl_secs = None` stores the value without expiry.
    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()>;

    /// Increments the integer under `key` and returns the new value.
    ///
    /// A missing key starts from 0. An existing TTL is kept as-is.
    async fn increment(&self, key: &str) -> StoreResult<i64>;

    /// Sets a TTL on an existing key. Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool>;

    /// Deletes every key in `keys`, returning how many existed.
    async fn delete(&self, keys: &[&str]) -> StoreResult<u64>;

    /// Returns `true` if `key` holds a live scalar or list.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Returns every live key matching the glob `pattern` (`*` and `?`).
    async fn keys_matching(&self, pattern: &str) -> StoreResult<BTreeSet<String>>;

    /// Pushes `values` onto the head of the list at `key`, in order, so the
    /// last value ends up first. Returns the new length.
    async fn list_push_front(&self, key: &str, values: &[String]) -> StoreResult<u64>;

    /// Trims the list so only the inclusive range `start..=stop` remains.
    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()>;

    /// Returns the inclusive range `start..=stop` of the list.
    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    /// Returns the length of the list at `key` (0 if missing).
    async fn list_len(&self, key: &str) -> StoreResult<u64>;

    /// Releases backend resources. Calling it more than once is a no-op.
    async fn close(&self) -> StoreResult<()>;

    /// Identifies the implementation.
    fn backend(&self) -> BackendKind;

    /// Whether the backend is currently reachable.
    fn is_connected(&self) -> bool;

    /// Reads and deletes `key` in one step.
    ///
    /// The default is a plain read followed by a delete, which is not atomic.
    /// Backends with a native get-and-delete should override it.
    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self.get(key).await?;
        if value.is_some() {
            self.delete(&[key]).await?;
        }
        Ok(value)
    }

    /// Deletes a single key. Returns `true` if it existed.
    async fn delete_one(&self, key: &str) -> StoreResult<bool> {
        Ok(self.delete(&[key]).await? > 0)
    }

    /// `true` when backed by the networked cache.
    fn is_networked(&self) -> bool {
        self.backend() == BackendKind::Networked
    }

    /// `true` when backed by the in-process fallback.
    fn is_fallback(&self) -> bool {
        self.backend() == BackendKind::Fallback
    }
}

/// Longest TTL either backend accepts: ten years.
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Rejects a zero TTL or one above [`MAX_TTL_SECS`]. Shared by both backends
/// so they fail identically.
pub fn validate_ttl(ttl_secs: u64) -> StoreResult<u64> {
    if ttl_secs == 0 {
        return Err(crate::StoreError::validation("ttl must be > 0 seconds"));
    }
    if ttl_secs > MAX_TTL_SECS {
        return Err(crate::StoreError::validation(format!(
            "ttl must be at most {MAX_TTL_SECS} seconds"
        )));
    }
    Ok(ttl_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ttl_bounds() {
        assert!(validate_ttl(0).unwrap_err().is_validation());
        assert_eq!(validate_ttl(1).unwrap(), 1);
        assert_eq!(validate_ttl(MAX_TTL_SECS).unwrap(), MAX_TTL_SECS);
        assert!(validate_ttl(MAX_TTL_SECS + 1).unwrap_err().is_validation());
        assert!(validate_ttl(u64::MAX).unwrap_err().is_validation());
    }
}
