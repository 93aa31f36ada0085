//! Redis-backed store.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool, PoolConfig, PoolError, Runtime};
use octoguard_storage::{
    BackendKind, KeyPattern, KvStore, StoreError, StoreResult, validate_ttl,
};
use redis::{AsyncCommands, ErrorKind, RedisError, RedisResult};

use crate::config::RedisConfig;
use crate::retry::BackoffPolicy;

const POOL_SIZE: usize = 16;
const POOL_TIMEOUT: Duration = Duration::from_secs(2);
const SCAN_BATCH: u32 = 256;

/// Store backed by a `deadpool-redis` pool.
///
/// Every command is retried on connection-level failures according to the
/// configured [`BackoffPolicy`]. When the last attempt fails the store marks
/// itself disconnected; while disconnected each command gets a single attempt
/// so callers are not held up by backoff sleeps during an outage. The first
/// successful command flips the flag back.
pub struct RedisStore {
    pool: Pool,
    policy: BackoffPolicy,
    host: String,
    connected: AtomicBool,
    /// Set once the initial `PING` succeeded. Until then a failure belongs to
    /// the caller's construction decision and is not logged as an outage.
    ready: AtomicBool,
    closed: AtomicBool,
}

impl RedisStore {
    /// Builds the pool and checks the server answers `PING`.
    ///
    /// # Errors
    ///
    /// - `Configuration` if the endpoint is missing or malformed, or the pool
    ///   cannot be created.
    /// - `Transient` if Redis did not answer within the retry policy.
    pub async fn connect(config: &RedisConfig) -> StoreResult<Self> {
        let store = Self::build(config)?;
        store.ping().await?;
        store.ready.store(true, Ordering::Release);

        tracing::info!(
            host = store.host.as_str(),
            max_attempts = store.policy.max_attempts,
            "Connected to Redis"
        );
        Ok(store)
    }

    /// Creates the pool without touching the network.
    fn build(config: &RedisConfig) -> StoreResult<Self> {
        let url = config.parsed_endpoint()?;

        let mut redis_config = deadpool_redis::Config::from_url(url.as_str());
        let mut pool_config = PoolConfig::new(POOL_SIZE);
        pool_config.timeouts.wait = Some(POOL_TIMEOUT);
        pool_config.timeouts.create = Some(POOL_TIMEOUT);
        pool_config.timeouts.recycle = Some(POOL_TIMEOUT);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::configuration(format!("failed to create Redis pool: {e}")))?;

        Ok(Self {
            pool,
            policy: config.backoff_policy(),
            host: url.host_str().unwrap_or("unix").to_string(),
            connected: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Round-trips a `PING`.
    pub async fn ping(&self) -> StoreResult<()> {
        self.run("ping", "", |mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Runs `command` with a pooled connection, retrying transient failures.
    async fn run<T, F, Fut>(&self, op: &'static str, key: &str, mut command: F) -> StoreResult<T>
    where
        F: FnMut(Connection) -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
        T: Send,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let attempts = if self.connected.load(Ordering::Acquire) {
            self.policy.max_attempts
        } else {
            1
        };
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt - 1);
                tracing::debug!(op, attempt, delay_ms = delay.as_millis() as u64, "retrying Redis command");
                tokio::time::sleep(delay).await;
            }

            let conn = match self.pool.get().await {
                Ok(conn) => conn,
                Err(PoolError::Closed) => return Err(StoreError::Closed),
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            match command(conn).await {
                Ok(value) => {
                    self.mark_connected();
                    return Ok(value);
                }
                Err(e) if is_transient(&e) => {
                    last_error = e.to_string();
                }
                Err(e) => {
                    // The server answered, so the connection itself is fine.
                    self.mark_connected();
                    return Err(classify(op, key, e));
                }
            }
        }

        self.mark_disconnected(op, &last_error);
        Err(StoreError::transient(format!(
            "{op} failed after {attempts} attempt(s): {last_error}"
        )))
    }

    fn mark_connected(&self) {
        if !self.connected.swap(true, Ordering::AcqRel) {
            tracing::info!("Redis connection restored");
        }
    }

    fn mark_disconnected(&self, op: &str, error: &str) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.ready.load(Ordering::Acquire) {
            tracing::warn!(
                op,
                error,
                max_attempts = self.policy.max_attempts,
                "Redis unreachable, marking store disconnected"
            );
        } else {
            tracing::debug!(op, error, "initial Redis ping failed");
        }
    }
}

fn is_transient(e: &RedisError) -> bool {
    e.is_io_error()
        || e.is_connection_dropped()
        || e.is_connection_refusal()
        || e.is_timeout()
        || matches!(e.kind(), ErrorKind::BusyLoadingError | ErrorKind::TryAgain)
}

fn expected_type(op: &str) -> &'static str {
    match op {
        "increment" => "integer",
        op if op.starts_with("list_") => "list",
        _ => "string",
    }
}

fn classify(op: &'static str, key: &str, e: RedisError) -> StoreError {
    if e.code() == Some("WRONGTYPE") {
        return StoreError::wrong_type(key, expected_type(op));
    }
    let message = e.to_string();
    if message.contains("not an integer") || message.contains("overflow") {
        return StoreError::validation(format!("{op} on '{key}': {message}"));
    }
    tracing::warn!(op, key, error = %message, "Redis command failed");
    StoreError::backend(format!("{op} on '{key}': {message}"))
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.run("get", key, |mut conn| async move {
            conn.get::<_, Option<String>>(key).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> StoreResult<()> {
        let ttl_secs = ttl_secs.map(validate_ttl).transpose()?;
        self.run("set", key, |mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl_secs {
                cmd.arg("EX").arg(ttl);
            }
            let _: () = cmd.query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    async fn increment(&self, key: &str) -> StoreResult<i64> {
        // INCR keeps the key's TTL.
        self.run("increment", key, |mut conn| async move {
            conn.incr::<_, _, i64>(key, 1).await
        })
        .await
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> StoreResult<bool> {
        let ttl_secs = validate_ttl(ttl_secs)?;
        self.run("expire", key, |mut conn| async move {
            let applied: i64 = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs)
                .query_async(&mut conn)
                .await?;
            Ok(applied == 1)
        })
        .await
    }

    async fn delete(&self, keys: &[&str]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let first = keys[0];
        self.run("delete", first, |mut conn| async move {
            conn.del::<_, u64>(keys).await
        })
        .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.run("exists", key, |mut conn| async move {
            conn.exists::<_, bool>(key).await
        })
        .await
    }

    async fn keys_matching(&self, pattern: &str) -> StoreResult<BTreeSet<String>> {
        let pattern = KeyPattern::new(pattern)?;
        let glob = pattern.to_redis_glob();
        let glob = glob.as_str();

        let keys = self
            .run("keys_matching", pattern.as_str(), |mut conn| async move {
                let mut keys = BTreeSet::new();
                let mut cursor: u64 = 0;
                loop {
                    let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(glob)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;
                    keys.extend(batch);
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Ok(keys)
            })
            .await?;

        Ok(keys.into_iter().filter(|k| pattern.matches(k)).collect())
    }

    async fn list_push_front(&self, key: &str, values: &[String]) -> StoreResult<u64> {
        if values.is_empty() {
            return Err(StoreError::validation("list push requires at least one value"));
        }
        self.run("list_push_front", key, |mut conn| async move {
            conn.lpush::<_, _, u64>(key, values).await
        })
        .await
    }

    async fn list_trim(&self, key: &str, start: i64, stop: i64) -> StoreResult<()> {
        self.run("list_trim", key, |mut conn| async move {
            let _: () = redis::cmd("LTRIM")
                .arg(key)
                .arg(start)
                .arg(stop)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.run("list_range", key, |mut conn| async move {
            let items: Vec<String> = redis::cmd("LRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .query_async(&mut conn)
                .await?;
            Ok(items)
        })
        .await
    }

    async fn list_len(&self, key: &str) -> StoreResult<u64> {
        self.run("list_len", key, |mut conn| async move {
            conn.llen::<_, u64>(key).await
        })
        .await
    }

    async fn take(&self, key: &str) -> StoreResult<Option<String>> {
        // GETDEL needs Redis >= 6.2.
        self.run("take", key, |mut conn| async move {
            let value: Option<String> = redis::cmd("GETDEL")
                .arg(key)
                .query_async(&mut conn)
                .await?;
            Ok(value)
        })
        .await
    }

    async fn close(&self) -> StoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pool.close();
        self.connected.store(false, Ordering::Release);
        tracing::info!("Redis store closed");
        Ok(())
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Networked
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }
}
