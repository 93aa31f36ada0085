//! Single-use anti-forgery tokens.
//!
//! A token is 32 random bytes, hex encoded, stored under `csrf:{token}` with
//! the identity it was issued to. Validation consumes the token: the first
//! successful call removes it, every later call fails even while the TTL has
//! not lapsed.
//!
//! # Consumption race
//!
//! The identity check reads the record and the consume step removes it with
//! [`KvStore::take`]. Only the caller whose `take` returns the record wins, so
//! two concurrent validations of one token cannot both succeed on a backend
//! with an atomic get-and-delete. If the store fails during `take` the token
//! is accepted anyway (the identity already matched), which means a token
//! could be replayed during a store outage.
//!
//! [`KvStore::take`]: octoguard_storage::KvStore::take

use std::time::Duration;

use octoguard_storage::{DynStore, KvStore, MAX_TTL_SECS};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::audit::{AuditTrail, SecurityEvent};
use crate::config::CsrfConfig;
use crate::{epoch_millis, metrics, report_store_error};

/// Random bytes per token.
pub const TOKEN_BYTES: usize = 32;

/// Length of the hex-encoded token.
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

const KEY_PREFIX: &str = "csrf:";
const COMPONENT: &str = "csrf";

/// An issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    /// Opaque value handed to the client.
    pub token: String,
    /// Identity the token is bound to.
    pub identity: String,
    pub issued_at: OffsetDateTime,
    pub ttl: Duration,
}

impl CsrfToken {
    pub fn as_str(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.issued_at + self.ttl
    }
}

/// What is persisted for each outstanding token.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredToken {
    identity: String,
    issued_at: i64,
}

fn token_key(token: &str) -> String {
    format!("{KEY_PREFIX}{token}")
}

/// Issues and validates CSRF tokens.
#[derive(Clone)]
pub struct CsrfTokenManager {
    store: DynStore,
    ttl: Duration,
    audit: Option<AuditTrail>,
}

impl CsrfTokenManager {
    pub fn new(store: DynStore, config: &CsrfConfig) -> Self {
        Self {
            store,
            ttl: config.token_ttl.min(Duration::from_secs(MAX_TTL_SECS)),
            audit: None,
        }
    }

    /// Records identity mismatches in `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn token_ttl(&self) -> Duration {
        self.ttl
    }

    /// Generates a new token value.
    ///
    /// Uses the thread-local CSPRNG; 256 bits of entropy.
    #[must_use]
    pub fn generate_token() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        hex::encode(bytes)
    }

    /// Returns `true` if `token` has the shape of a token this manager issues.
    #[must_use]
    pub fn is_well_formed(token: &str) -> bool {
        token.len() == TOKEN_LEN && token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    /// Issues a token bound to `identity`.
    ///
    /// A failed store write is logged and the token is still returned; it
    /// will simply fail validation.
    pub async fn issue(&self, identity: &str) -> CsrfToken {
        let token = Self::generate_token();
        let issued_at = OffsetDateTime::now_utc();
        let record = StoredToken {
            identity: identity.to_string(),
            issued_at: epoch_millis(issued_at),
        };

        match serde_json::to_string(&record) {
            Ok(payload) => {
                let ttl_secs = self.ttl.as_secs().max(1);
                if let Err(e) = self
                    .store
                    .set(&token_key(&token), &payload, Some(ttl_secs))
                    .await
                {
                    report_store_error(COMPONENT, "issue", &e);
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode CSRF token record"),
        }

        metrics::record_csrf_issued();
        tracing::debug!(identity, "issued CSRF token");

        CsrfToken {
            token,
            identity: identity.to_string(),
            issued_at,
            ttl: self.ttl,
        }
    }

    /// Validates `token` for `identity` and consumes it on success.
    ///
    /// A token presented by the wrong identity is left in place so its
    /// rightful owner can still use it.
    pub async fn validate_and_consume(&self, token: &str, identity: &str) -> bool {
        if !Self::is_well_formed(token) {
            metrics::record_csrf_validation("malformed");
            return false;
        }
        let key = token_key(token);

        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::record_csrf_validation("missing");
                return false;
            }
            Err(e) => {
                report_store_error(COMPONENT, "validate", &e);
                metrics::record_csrf_validation("missing");
                return false;
            }
        };

        let stored: StoredToken = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable CSRF token record");
                metrics::record_csrf_validation("malformed");
                return false;
            }
        };

        if stored.identity != identity {
            tracing::warn!(
                expected = %stored.identity,
                presented = identity,
                "CSRF token presented by a different identity"
            );
            metrics::record_csrf_validation("mismatch");
            if let Some(audit) = &self.audit {
                audit
                    .record(SecurityEvent::CsrfRejected {
                        identity: identity.to_string(),
                        reason: "identity mismatch".to_string(),
                    })
                    .await;
            }
            return false;
        }

        match self.store.take(&key).await {
            Ok(Some(_)) => {
                metrics::record_csrf_validation("accepted");
                true
            }
            Ok(None) => {
                // Another request consumed it between our read and take.
                metrics::record_csrf_validation("replayed");
                false
            }
            Err(e) => {
                report_store_error(COMPONENT, "consume", &e);
                metrics::record_csrf_validation("accepted");
                true
            }
        }
    }

    /// Deletes a token before it is used. Returns `true` if it existed.
    pub async fn revoke(&self, token: &str) -> bool {
        if !Self::is_well_formed(token) {
            return false;
        }
        match self.store.delete_one(&token_key(token)).await {
            Ok(existed) => existed,
            Err(e) => {
                report_store_error(COMPONENT, "revoke", &e);
                false
            }
        }
    }
}
