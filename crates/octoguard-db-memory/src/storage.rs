use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use octoguard_storage::{
    BackendKind, Clock, KeyPattern, KvStore, StoreError, StoreResult, SystemClock, validate_ttl,
};

/// A scalar value with an optional absolute expiry.
#[derive(Debug, Clone)]
struct ScalarEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl ScalarEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A list with an optional absolute expiry.
#[derive(Debug, Clone, Default)]
struct ListEntry {
    items: VecDeque<String>,
    expires_at: Option<Instant>,
}

impl ListEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Resolves an inclusive `start..=stop` range against a list of `len` items
/// using Redis index rules. Returns `None` when the range is empty.
pub(crate) fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    let start = if start < 0 { (len + start).max(0) } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start > stop || start >= len {
        return None;
    }
    if stop >= len {
        stop = len - 1;
    }
    Some((start as usize, stop as usize))
}

/// In-process fallback store with lazy expiry.
///
/// Scalars and lists are kept in two separate maps that share one key
/// namespace. Expired entries are removed when a read touches them; nothing
/// runs in the background, so an expired key nobody reads again stays in
/// memory until [`purge_expired`](Self::purge_expired) or `close`.
pub struct InMemoryStore {
    scalars: DashMap<String, ScalarEntry>,
    lists: DashMap<String, ListEntry>,
    clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl InMemoryStore {
    /// Creates an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store driven by `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            scalars: DashMap::new(),
            lists: DashMap::new(),
            clock,
            closed: AtomicBool::new(false),
        }
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;

        self.scalars.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.lists.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            tracing::debug!(removed, "purged expired entries");
        }
        removed
    }

    /// Number of entries held, including expired ones not yet touched.
    pub fn entry_count(&self) -> usize {
        self.scalars.len() + self.lists.len()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn deadline(now: Instant, ttl_secs: u64) -> StoreResult<Instant> {
        now.checked_add(Duration::from_secs(ttl_secs))
            .ok_or_else(|| StoreError::validation(format!("ttl of {ttl_secs}s is out of range")))
    }

    /// Reads a live scalar, dropping it if it has expired.
    fn read_scalar(&self, key: &str, now: Instant) -> Option<String> {
        match self.scalars.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        self.scalars.remove_if(key, |_, entry| entry.is_expired(now));
        None
    }

    /// Checks for a live list, dropping it if it has expired.
    fn list_is_live(&self, key: &str, now: Instant) -> bool {
        match self.lists.get(key) {
            Some(entry) if !entry.is_expired(now) => return true,
            Some(_) => {}
            None => return false,
        }
        self.lists.remove_if(key, |_, entry| entry.is_expired(now));
        false
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("scalars", &self.scalars.len())
            .field("lists", &self.lists.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        let now = self.clock.now();

        if let Some(value) = self.read_scalar(key, now) {
            return Ok(Some(value));
        }
        if self.list_is_live(key, now) {
            return Err(StoreError::wrong_type(key, "string"));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        self.ensure_open()?;
        let ttl_secs = ttl_secs.map(validate_ttl).transpose()?;
        let now = self.clock.now();
        let expires_at = ttl_secs
            .map(|ttl| Self::deadline(now, ttl))
            .transpose()?;

        // SET replaces a value of any type.
        self.lists.remove(key);
        self.scalars.insert(
            key.to_string(),
            ScalarEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        self.ensure_open()?;
        let now = self.clock.now();

        if self.list_is_live(key, now) {
            return Err(StoreError::wrong_type(key, "integer"));
        }

        let mut entry = self
            .scalars
            .entry(key.to_string())
            .or_insert_with(|| ScalarEntry {
                value: "0".to_string(),
                expires_at: None,
            });
        if entry.is_expired(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }

        let current = entry.value.trim().parse::<i64>().unwrap_or(0);
        let next = current
            .checked_add(1)
            .ok_or_else(|| StoreError::validation(format!("increment would overflow '{key}'")))?;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool> {
        self.ensure_open()?;
        let ttl_secs = validate_ttl(ttl_secs)?;
        let now = self.clock.now();
        let deadline = Self::deadline(now, ttl_secs)?;

        if let Some(mut entry) = self.scalars.get_mut(key) {
            if !entry.is_expired(now) {
                entry.expires_at = Some(deadline);
                return Ok(true);
            }
        }
        self.scalars.remove_if(key, |_, entry| entry.is_expired(now));

        if let Some(mut entry) = self.lists.get_mut(key) {
            if !entry.is_expired(now) {
                entry.expires_at = Some(deadline);
                return Ok(true);
            }
        }
        self.lists.remove_if(key, |_, entry| entry.is_expired(now));

        Ok(false)
    }

    async fn delete(&self, keys: &[&str]) -> StoreResult<u64> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut removed = 0;

        for key in keys {
            if let Some((_, entry)) = self.scalars.remove(*key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
            if let Some((_, entry)) = self.lists.remove(*key) {
                if !entry.is_expired(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        let now = self.clock.now();
        Ok(self.read_scalar(key, now).is_some() || self.list_is_live(key, now))
    }

    async fn keys_matching(&self, pattern: &str) -> StoreResult<BTreeSet<String>> {
        self.ensure_open()?;
        let pattern = KeyPattern::new(pattern)?;
        let now = self.clock.now();

        let mut keys: BTreeSet<String> = self
            .scalars
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && pattern.matches(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.extend(
            self.lists
                .iter()
                .filter(|entry| !entry.value().is_expired(now) && pattern.matches(entry.key()))
                .map(|entry| entry.key().clone()),
        );
        Ok(keys)
    }

    async fn list_push_front(&self, key: &str, values: &[String]) -> StoreResult<u64> {
        self.ensure_open()?;
        if values.is_empty() {
            return Err(StoreError::validation("list push requires at least one value"));
        }
        let now = self.clock.now();

        if self.read_scalar(key, now).is_some() {
            return Err(StoreError::wrong_type(key, "list"));
        }

        let mut entry = self.lists.entry(key.to_string()).or_default();
        if entry.is_expired(now) {
            entry.items.clear();
            entry.expires_at = None;
        }
        for value in values {
            entry.items.push_front(value.clone());
        }
        Ok(entry.items.len() as u64)
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        self.ensure_open()?;
        let now = self.clock.now();

        if self.read_scalar(key, now).is_some() {
            return Err(StoreError::wrong_type(key, "list"));
        }
        if !self.list_is_live(key, now) {
            return Ok(());
        }

        let emptied = match self.lists.get_mut(key) {
            Some(mut entry) => {
                match normalize_range(entry.items.len(), start, stop) {
                    Some((from, to)) => {
                        entry.items.truncate(to + 1);
                        entry.items.drain(..from);
                    }
                    None => entry.items.clear(),
                }
                entry.items.is_empty()
            }
            None => false,
        };

        // Redis drops a list once it has no elements left.
        if emptied {
            self.lists.remove(key);
        }
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        let now = self.clock.now();

        if self.read_scalar(key, now).is_some() {
            return Err(StoreError::wrong_type(key, "list"));
        }
        if !self.list_is_live(key, now) {
            return Ok(Vec::new());
        }

        let items = self
            .lists
            .get(key)
            .map(|entry| match normalize_range(entry.items.len(), start, stop) {
                Some((from, to)) => entry.items.range(from..=to).cloned().collect(),
                None => Vec::new(),
            })
            .unwrap_or_default();
        Ok(items)
    }

    async fn list_len(&self, key: &str) -> StoreResult<u64> {
        self.ensure_open()?;
        let now = self.clock.now();

        if self.read_scalar(key, now).is_some() {
            return Err(StoreError::wrong_type(key, "list"));
        }
        if !self.list_is_live(key, now) {
            return Ok(0);
        }
        Ok(self
            .lists
            .get(key)
            .map(|entry| entry.items.len() as u64)
            .unwrap_or(0))
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        let now = self.clock.now();

        if self.list_is_live(key, now) {
            return Err(StoreError::wrong_type(key, "string"));
        }
        Ok(self
            .scalars
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.value))
    }

    async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.scalars.clear();
        self.lists.clear();
        tracing::debug!("in-memory store closed");
        Ok(())
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Fallback
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octoguard_storage::ManualClock;

    fn store_with_clock() -> (InMemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (InMemoryStore::with_clock(clock.clone()), clock)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_value_expires_lazily() {
        let (store, clock) = store_with_clock();
        store.set("k", "v", Some(10)).await.unwrap();

        clock.advance(Duration::from_secs(9));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.entry_count(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        // The read removed the expired entry.
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let store = InMemoryStore::new();
        let err = store.set("k", "v", Some(0)).await.unwrap_err();
        assert!(err.is_validation());
        let err = store.expire("k", 0).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_keys_matching_spans_newlines() {
        let store = InMemoryStore::new();
        store.set("blocked_ip:a\nb", "{}", Some(60)).await.unwrap();

        let keys = store.keys_matching("blocked_ip:*").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("blocked_ip:a\nb"));
    }

    #[tokio::test]
    async fn test_huge_ttl_rejected() {
        let store = InMemoryStore::new();
        let err = store.set("k", "v", Some(u64::MAX)).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v", None).await.unwrap();
        let err = store.expire("k", u64::MAX).await.unwrap_err();
        assert!(err.is_validation());
        // The key keeps its old (absent) expiry.
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store
            .set("k", "v", Some(octoguard_storage::MAX_TTL_SECS))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_increment_starts_at_zero() {
        let store = InMemoryStore::new();
        assert_eq!(store.increment("n").await.unwrap(), 1);
        assert_eq!(store.increment("n").await.unwrap(), 2);
        assert_eq!(store.get("n").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_increment_unparsable_value_restarts() {
        let store = InMemoryStore::new();
        store.set("n", "not-a-number", None).await.unwrap();
        assert_eq!(store.increment("n").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_increment_preserves_ttl() {
        let (store, clock) = store_with_clock();
        store.increment("n").await.unwrap();
        assert!(store.expire("n", 60).await.unwrap());

        clock.advance(Duration::from_secs(30));
        assert_eq!(store.increment("n").await.unwrap(), 2);

        clock.advance(Duration::from_secs(30));
        assert_eq!(store.get("n").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_increment_after_expiry_restarts() {
        let (store, clock) = store_with_clock();
        store.set("n", "7", Some(5)).await.unwrap();
        clock.advance(Duration::from_secs(5));
        assert_eq!(store.increment("n").await.unwrap(), 1);

        // The restarted counter has no TTL.
        clock.advance(Duration::from_secs(3600));
        assert_eq!(store.get("n").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_increment_overflow() {
        let store = InMemoryStore::new();
        store.set("n", &i64::MAX.to_string(), None).await.unwrap();
        assert!(store.increment("n").await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let store = InMemoryStore::new();
        assert!(!store.expire("missing", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_counts_live_keys() {
        let (store, clock) = store_with_clock();
        store.set("a", "1", None).await.unwrap();
        store.set("b", "2", Some(1)).await.unwrap();
        store.list_push_front("c", &strings(&["x"])).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let removed = store.delete(&["a", "b", "c", "d"]).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!store.exists("a").await.unwrap());
        assert!(!store.delete_one("a").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_matching_skips_expired() {
        let (store, clock) = store_with_clock();
        store.set("blocked_ip:1.1.1.1", "x", Some(10)).await.unwrap();
        store.set("blocked_ip:2.2.2.2", "x", Some(100)).await.unwrap();
        store.set("violations:1.1.1.1", "3", None).await.unwrap();
        clock.advance(Duration::from_secs(20));

        let keys = store.keys_matching("blocked_ip:*").await.unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["blocked_ip:2.2.2.2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_keys_matching_includes_lists() {
        let store = InMemoryStore::new();
        store.list_push_front("audit:trail", &strings(&["e"])).await.unwrap();
        store.set("audit:count", "1", None).await.unwrap();

        let keys = store.keys_matching("audit:?????").await.unwrap();
        assert_eq!(keys.len(), 2);
    }

    #[tokio::test]
    async fn test_list_push_front_order() {
        let store = InMemoryStore::new();
        assert_eq!(store.list_push_front("l", &strings(&["a", "b"])).await.unwrap(), 2);
        assert_eq!(store.list_push_front("l", &strings(&["c"])).await.unwrap(), 3);

        let all = store.list_range("l", 0, -1).await.unwrap();
        assert_eq!(all, strings(&["c", "b", "a"]));
    }

    #[tokio::test]
    async fn test_list_push_requires_values() {
        let store = InMemoryStore::new();
        assert!(store.list_push_front("l", &[]).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_list_trim_negative_indices() {
        let store = InMemoryStore::new();
        store
            .list_push_front("l", &strings(&["5", "4", "3", "2", "1"]))
            .await
            .unwrap();

        store.list_trim("l", 1, -2).await.unwrap();
        assert_eq!(store.list_range("l", 0, -1).await.unwrap(), strings(&["2", "3", "4"]));
        assert_eq!(store.list_len("l").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_trim_to_empty_removes_key() {
        let store = InMemoryStore::new();
        store.list_push_front("l", &strings(&["a"])).await.unwrap();
        store.list_trim("l", 5, 10).await.unwrap();
        assert!(!store.exists("l").await.unwrap());
        assert_eq!(store.list_len("l").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_range_out_of_bounds() {
        let store = InMemoryStore::new();
        store.list_push_front("l", &strings(&["c", "b", "a"])).await.unwrap();

        assert_eq!(store.list_range("l", 1, 100).await.unwrap(), strings(&["b", "c"]));
        assert_eq!(store.list_range("l", -100, 0).await.unwrap(), strings(&["a"]));
        assert!(store.list_range("l", 2, 1).await.unwrap().is_empty());
        assert!(store.list_range("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lists_honour_expire() {
        let (store, clock) = store_with_clock();
        store.list_push_front("l", &strings(&["a"])).await.unwrap();
        assert!(store.expire("l", 5).await.unwrap());

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.list_len("l").await.unwrap(), 0);
        assert!(!store.exists("l").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_errors() {
        let store = InMemoryStore::new();
        store.set("s", "v", None).await.unwrap();
        store.list_push_front("l", &strings(&["a"])).await.unwrap();

        assert!(matches!(
            store.list_push_front("s", &strings(&["x"])).await,
            Err(StoreError::WrongType { .. })
        ));
        assert!(matches!(store.get("l").await, Err(StoreError::WrongType { .. })));
        assert!(matches!(store.increment("l").await, Err(StoreError::WrongType { .. })));
        assert!(matches!(store.list_len("s").await, Err(StoreError::WrongType { .. })));
    }

    #[tokio::test]
    async fn test_set_replaces_list() {
        let store = InMemoryStore::new();
        store.list_push_front("k", &strings(&["a"])).await.unwrap();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_take_is_single_shot() {
        let store = InMemoryStore::new();
        store.set("t", "v", Some(60)).await.unwrap();
        assert_eq!(store.take("t").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.take("t").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_expired() {
        let (store, clock) = store_with_clock();
        store.set("t", "v", Some(1)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(store.take("t").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store_with_clock();
        store.set("a", "1", Some(1)).await.unwrap();
        store.set("b", "1", None).await.unwrap();
        store.list_push_front("c", &strings(&["x"])).await.unwrap();
        store.expire("c", 1).await.unwrap();
        clock.advance(Duration::from_secs(2));

        assert_eq!(store.purge_expired(), 2);
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let store = InMemoryStore::new();
        store.set("k", "v", None).await.unwrap();

        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(!store.is_connected());
        assert!(matches!(store.get("k").await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn test_backend_kind() {
        let store = InMemoryStore::new();
        assert!(store.is_fallback());
        assert!(!store.is_networked());
        assert!(store.is_connected());
    }

    #[test]
    fn test_normalize_range() {
        assert_eq!(normalize_range(5, 0, -1), Some((0, 4)));
        assert_eq!(normalize_range(5, -2, -1), Some((3, 4)));
        assert_eq!(normalize_range(5, 0, 99), Some((0, 4)));
        assert_eq!(normalize_range(5, 3, 1), None);
        assert_eq!(normalize_range(0, 0, -1), None);
        assert_eq!(normalize_range(5, 0, -10), None);
    }
}
