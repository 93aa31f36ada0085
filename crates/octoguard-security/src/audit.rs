//! Bounded, newest-first audit trail.
//!
//! Entries are JSON objects pushed to the front of a single list and the list
//! is trimmed to the configured cap. Every entry carries a numeric
//! `timestamp` in epoch milliseconds.

use octoguard_storage::{DynStore, KvStore};
use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::config::AuditConfig;
use crate::{epoch_millis, metrics, report_store_error};

const COMPONENT: &str = "audit";

/// A row read back from the trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AuditRecord {
    Structured(Value),
    /// A row that is not a JSON object.
    Raw { raw: String },
}

impl AuditRecord {
    fn parse(raw: String) -> Self {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value @ Value::Object(_)) => AuditRecord::Structured(value),
            _ => AuditRecord::Raw { raw },
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            AuditRecord::Structured(value) => Some(value),
            AuditRecord::Raw { .. } => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, AuditRecord::Raw { .. })
    }

    /// Epoch milliseconds, when the entry has one.
    pub fn timestamp(&self) -> Option<i64> {
        self.as_structured()?.get("timestamp")?.as_i64()
    }
}

/// Security events emitted by the other services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action")]
pub enum SecurityEvent {
    #[serde(rename = "csrf.rejected")]
    CsrfRejected { identity: String, reason: String },

    #[serde(rename = "ip.violation")]
    IpViolation { ip: String, reason: String, count: u64 },

    #[serde(rename = "ip.blocked")]
    IpBlocked {
        ip: String,
        reason: String,
        automatic: bool,
        #[serde(rename = "durationSecs")]
        duration_secs: u64,
    },

    #[serde(rename = "ip.unblocked")]
    IpUnblocked { ip: String },
}

/// Ensures `record` is an object with a numeric `timestamp`.
fn stamp(record: Value, now: OffsetDateTime) -> Value {
    let mut object = match record {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    if !object.get("timestamp").is_some_and(Value::is_number) {
        object.insert("timestamp".to_string(), Value::from(epoch_millis(now)));
    }
    Value::Object(object)
}

/// Handle to the audit list.
#[derive(Clone)]
pub struct AuditTrail {
    store: DynStore,
    key: String,
    max_entries: u64,
}

impl AuditTrail {
    pub fn new(store: DynStore, config: &AuditConfig) -> Self {
        Self {
            store,
            key: config.key.clone(),
            max_entries: config.max_entries.max(1),
        }
    }

    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// Prepends `record`, stamping it with the current time if it has no
    /// numeric `timestamp`. Non-object values are wrapped as `{"value": ..}`.
    pub async fn push_entry(&self, record: Value) {
        let payload = stamp(record, OffsetDateTime::now_utc()).to_string();

        let len = match self.store.list_push_front(&self.key, &[payload]).await {
            Ok(len) => len,
            Err(e) => {
                report_store_error(COMPONENT, "push_entry", &e);
                return;
            }
        };

        if len > self.max_entries {
            let stop = i64::try_from(self.max_entries - 1).unwrap_or(i64::MAX);
            if let Err(e) = self.store.list_trim(&self.key, 0, stop).await {
                report_store_error(COMPONENT, "push_entry", &e);
                metrics::set_audit_entries(len);
                return;
            }
        }
        metrics::set_audit_entries(len.min(self.max_entries));
    }

    /// Appends a typed event.
    pub async fn record(&self, event: SecurityEvent) {
        match serde_json::to_value(&event) {
            Ok(value) => self.push_entry(value).await,
            Err(e) => tracing::error!(error = %e, "failed to encode audit event"),
        }
    }

    /// Newest entries first. `limit` is clamped to `1..=max_entries`.
    pub async fn get_entries(&self, limit: u64) -> Vec<AuditRecord> {
        let limit = limit.clamp(1, self.max_entries);
        let stop = i64::try_from(limit - 1).unwrap_or(i64::MAX);

        match self.store.list_range(&self.key, 0, stop).await {
            Ok(rows) => rows.into_iter().map(AuditRecord::parse).collect(),
            Err(e) => {
                report_store_error(COMPONENT, "get_entries", &e);
                Vec::new()
            }
        }
    }

    pub async fn len(&self) -> u64 {
        match self.store.list_len(&self.key).await {
            Ok(len) => len,
            Err(e) => {
                report_store_error(COMPONENT, "len", &e);
                0
            }
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
