//! # octoguard-security
//!
//! Request-security services backed by an OctoGuard store:
//!
//! - [`CsrfTokenManager`] - single-use anti-forgery tokens bound to an identity
//! - [`IpGuard`] - per-IP violation counting with automatic temporary blocks
//! - [`AuditTrail`] - bounded, newest-first log of security events
//!
//! The store is picked once by [`create_store`]: Redis when an endpoint is
//! configured and reachable, the in-process store otherwise. Services never
//! fail a request because the store failed; errors are logged, counted and
//! treated as "nothing stored".
//!
//! ## Example
//!
//! ```ignore
//! use octoguard_security::{SecurityConfig, SecurityServices};
//!
//! let services = SecurityServices::from_config(&SecurityConfig::default()).await;
//! let token = services.csrf.issue("user-1").await;
//! assert!(services.csrf.validate_and_consume(token.as_str(), "user-1").await);
//! services.shutdown().await;
//! ```

pub mod audit;
pub mod config;
pub mod csrf;
pub mod ip_guard;
pub mod metrics;
pub mod observability;
mod services;

use std::sync::Arc;

use octoguard_db_memory::InMemoryStore;
use octoguard_db_redis::{RedisConfig, RedisStore};
use octoguard_storage::{DynStore, StoreError};
use time::OffsetDateTime;

pub use audit::{AuditRecord, AuditTrail, SecurityEvent};
pub use config::{ConfigError, SecurityConfig};
pub use csrf::{CsrfToken, CsrfTokenManager};
pub use ip_guard::{EscalationState, IpBlock, IpGuard, ViolationRecord};
pub use octoguard_storage::{BackendKind, KvStore};
pub use services::SecurityServices;

/// Builds the store the security services share.
///
/// Never fails: with no endpoint, or when Redis cannot be reached, the
/// in-process store is returned and a single log line records why.
pub async fn create_store(config: &RedisConfig) -> DynStore {
    if config.endpoint().is_none() {
        tracing::info!("No Redis endpoint configured, using in-process security store");
        return Arc::new(InMemoryStore::new());
    }

    match RedisStore::connect(config).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                error = %e,
                category = %e.category(),
                "Redis unavailable, falling back to in-process security store"
            );
            Arc::new(InMemoryStore::new())
        }
    }
}

/// Logs and counts a store failure that the caller is about to swallow.
pub(crate) fn report_store_error(component: &'static str, op: &'static str, error: &StoreError) {
    tracing::warn!(component, op, error = %error, "store operation failed");
    metrics::record_store_error(component, error);
}

pub(crate) fn epoch_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}
