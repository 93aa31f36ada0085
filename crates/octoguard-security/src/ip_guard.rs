//! Per-IP violation counting and temporary blocking.
//!
//! Violations are counted under `violations:{ip}`; every new violation
//! restarts the window, so the counter only disappears after a full quiet
//! window. Blocks live under `blocked_ip:{ip}` and expire on their own.
//!
//! All store failures are logged and treated as "nothing recorded": the
//! guard never turns a storage outage into a rejected request.

use std::time::Duration;

use octoguard_storage::{DynStore, KvStore, MAX_TTL_SECS};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::audit::{AuditTrail, SecurityEvent};
use crate::config::IpGuardConfig;
use crate::{metrics, report_store_error};

const VIOLATION_PREFIX: &str = "violations:";
const BLOCK_PREFIX: &str = "blocked_ip:";
const COMPONENT: &str = "ip_guard";

fn violation_key(ip: &str) -> String {
    format!("{VIOLATION_PREFIX}{ip}")
}

fn block_key(ip: &str) -> String {
    format!("{BLOCK_PREFIX}{ip}")
}

/// `now + duration`, or `None` if the duration exceeds what the store accepts.
fn deadline(now: OffsetDateTime, duration: Duration) -> Option<OffsetDateTime> {
    if duration.as_secs() > MAX_TTL_SECS {
        return None;
    }
    now.checked_add(time::Duration::try_from(duration).ok()?)
}

/// A stored block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpBlock {
    pub ip: String,
    pub reason: String,
    #[serde(with = "time::serde::rfc3339")]
    pub blocked_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl IpBlock {
    /// Time left before the block lapses, or zero if it already has.
    pub fn remaining(&self, now: OffsetDateTime) -> time::Duration {
        (self.expires_at - now).max(time::Duration::ZERO)
    }
}

/// Outcome of [`IpGuard::record_violation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationRecord {
    pub ip: String,
    /// Violations in the current window, including this one. Zero if the
    /// store could not be reached.
    pub count: u64,
    /// When the counter lapses unless another violation arrives.
    pub window_expires_at: OffsetDateTime,
    /// Set when this violation triggered a new block.
    pub block: Option<IpBlock>,
}

impl ViolationRecord {
    pub fn triggered_block(&self) -> bool {
        self.block.is_some()
    }
}

/// Where an address stands right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationState {
    Clean,
    /// Violations recorded but below the block threshold.
    Warned { count: u64 },
    Blocked(IpBlock),
}

#[derive(Debug, Clone, Copy)]
enum BlockKind {
    Automatic,
    Manual,
}

impl BlockKind {
    fn as_str(self) -> &'static str {
        match self {
            BlockKind::Automatic => "automatic",
            BlockKind::Manual => "manual",
        }
    }
}

/// IP reputation tracker.
#[derive(Clone)]
pub struct IpGuard {
    store: DynStore,
    config: IpGuardConfig,
    audit: Option<AuditTrail>,
}

impl IpGuard {
    pub fn new(store: DynStore, config: &IpGuardConfig) -> Self {
        Self {
            store,
            config: config.clone(),
            audit: None,
        }
    }

    /// Logs violations, blocks and unblocks to `audit`.
    #[must_use]
    pub fn with_audit(mut self, audit: AuditTrail) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &IpGuardConfig {
        &self.config
    }

    /// Records a violation using the configured window.
    pub async fn record_violation(&self, ip: &str, reason: &str) -> ViolationRecord {
        self.record_violation_with_window(ip, reason, self.config.violation_window)
            .await
    }

    /// Records a violation and blocks the address once the threshold is
    /// reached, unless it is already blocked.
    pub async fn record_violation_with_window(
        &self,
        ip: &str,
        reason: &str,
        window: Duration,
    ) -> ViolationRecord {
        metrics::record_violation();
        let key = violation_key(ip);
        let now = OffsetDateTime::now_utc();
        let Some(window_expires_at) = deadline(now, window) else {
            tracing::warn!(ip, window_secs = window.as_secs(), "violation window out of range");
            return ViolationRecord {
                ip: ip.to_string(),
                count: 0,
                window_expires_at: now,
                block: None,
            };
        };

        let count = match self.store.increment(&key).await {
            Ok(count) => u64::try_from(count).unwrap_or(0),
            Err(e) => {
                report_store_error(COMPONENT, "record_violation", &e);
                return ViolationRecord {
                    ip: ip.to_string(),
                    count: 0,
                    window_expires_at,
                    block: None,
                };
            }
        };

        if let Err(e) = self.store.expire(&key, window.as_secs().max(1)).await {
            report_store_error(COMPONENT, "record_violation", &e);
        }

        tracing::debug!(ip, reason, count, "recorded violation");
        if let Some(audit) = &self.audit {
            audit
                .record(SecurityEvent::IpViolation {
                    ip: ip.to_string(),
                    reason: reason.to_string(),
                    count,
                })
                .await;
        }

        let mut block = None;
        if count >= self.config.violation_threshold && self.is_blocked(ip).await.is_none() {
            block = self
                .block(ip, reason, self.config.block_duration, BlockKind::Automatic)
                .await;
        }

        ViolationRecord {
            ip: ip.to_string(),
            count,
            window_expires_at,
            block,
        }
    }

    /// Returns the active block for `ip`, if any.
    pub async fn is_blocked(&self, ip: &str) -> Option<IpBlock> {
        let raw = match self.store.get(&block_key(ip)).await {
            Ok(raw) => raw?,
            Err(e) => {
                report_store_error(COMPONENT, "is_blocked", &e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(block) => Some(block),
            Err(e) => {
                tracing::warn!(ip, error = %e, "ignoring unreadable block record");
                None
            }
        }
    }

    /// Blocks `ip` for `ttl_secs` seconds, replacing any existing block.
    ///
    /// Returns `None` if the block could not be stored.
    pub async fn block_ip(&self, ip: &str, reason: &str, ttl_secs: u64) -> Option<IpBlock> {
        self.block(ip, reason, Duration::from_secs(ttl_secs), BlockKind::Manual)
            .await
    }

    async fn block(
        &self,
        ip: &str,
        reason: &str,
        duration: Duration,
        kind: BlockKind,
    ) -> Option<IpBlock> {
        let blocked_at = OffsetDateTime::now_utc();
        let Some(expires_at) = deadline(blocked_at, duration) else {
            tracing::warn!(ip, duration_secs = duration.as_secs(), "block duration out of range");
            return None;
        };
        let block = IpBlock {
            ip: ip.to_string(),
            reason: reason.to_string(),
            blocked_at,
            expires_at,
        };

        let payload = match serde_json::to_string(&block) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(ip, error = %e, "failed to encode block record");
                return None;
            }
        };
        if let Err(e) = self
            .store
            .set(&block_key(ip), &payload, Some(duration.as_secs()))
            .await
        {
            report_store_error(COMPONENT, "block", &e);
            return None;
        }

        metrics::record_ip_block(kind.as_str());
        tracing::warn!(
            ip,
            reason,
            kind = kind.as_str(),
            duration_secs = duration.as_secs(),
            "blocked IP"
        );

        if let Some(audit) = &self.audit {
            audit
                .record(SecurityEvent::IpBlocked {
                    ip: ip.to_string(),
                    reason: reason.to_string(),
                    automatic: matches!(kind, BlockKind::Automatic),
                    duration_secs: duration.as_secs(),
                })
                .await;
        }

        Some(block)
    }

    /// Lifts a block. Returns `true` if one was present.
    pub async fn unblock(&self, ip: &str) -> bool {
        let removed = match self.store.delete_one(&block_key(ip)).await {
            Ok(removed) => removed,
            Err(e) => {
                report_store_error(COMPONENT, "unblock", &e);
                return false;
            }
        };

        if removed {
            tracing::info!(ip, "unblocked IP");
            if let Some(audit) = &self.audit {
                audit
                    .record(SecurityEvent::IpUnblocked { ip: ip.to_string() })
                    .await;
            }
        }
        removed
    }

    /// Forgets the violation history of `ip` without touching any block.
    pub async fn clear_violations(&self, ip: &str) -> bool {
        match self.store.delete_one(&violation_key(ip)).await {
            Ok(removed) => removed,
            Err(e) => {
                report_store_error(COMPONENT, "clear_violations", &e);
                false
            }
        }
    }

    /// Violations in the current window.
    pub async fn violation_count(&self, ip: &str) -> u64 {
        match self.store.get(&violation_key(ip)).await {
            Ok(Some(raw)) => raw.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                report_store_error(COMPONENT, "violation_count", &e);
                0
            }
        }
    }

    /// Every active block, in key order.
    pub async fn blocked_ips(&self) -> Vec<IpBlock> {
        let keys = match self.store.keys_matching(&format!("{BLOCK_PREFIX}*")).await {
            Ok(keys) => keys,
            Err(e) => {
                report_store_error(COMPONENT, "blocked_ips", &e);
                return Vec::new();
            }
        };

        let mut blocks = Vec::with_capacity(keys.len());
        for key in keys {
            // Blocks can expire between the scan and the read.
            if let Some(block) = self.is_blocked(&key[BLOCK_PREFIX.len()..]).await {
                blocks.push(block);
            }
        }
        blocks
    }

    pub async fn escalation_state(&self, ip: &str) -> EscalationState {
        if let Some(block) = self.is_blocked(ip).await {
            return EscalationState::Blocked(block);
        }
        match self.violation_count(ip).await {
            0 => EscalationState::Clean,
            count => EscalationState::Warned { count },
        }
    }
}
