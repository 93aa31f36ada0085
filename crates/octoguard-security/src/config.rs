//! Security layer configuration.
//!
//! # Example (TOML)
//!
//! ```toml
//! [redis]
//! url = "redis://localhost:6379"
//! max_retry_attempts = 5
//! backoff_base = "100ms"
//!
//! [csrf]
//! token_ttl = "1h"
//!
//! [ip_guard]
//! violation_threshold = 10
//! violation_window = "1h"
//! block_duration = "24h"
//!
//! [audit]
//! max_entries = 10000
//! ```
//!
//! Every field can be overridden from the environment, e.g.
//! `OCTOGUARD__REDIS__URL=redis://cache:6379`.

use std::time::Duration;

use octoguard_db_redis::RedisConfig;
use octoguard_storage::MAX_TTL_SECS;
use serde::{Deserialize, Serialize};

/// Default cap on the audit trail.
pub const DEFAULT_AUDIT_MAX_ENTRIES: u64 = 10_000;

/// Root configuration for the security layer.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Networked store settings. No URL means the in-process store is used.
    pub redis: RedisConfig,

    pub csrf: CsrfConfig,

    pub ip_guard: IpGuardConfig,

    pub audit: AuditConfig,

    pub logging: LoggingConfig,
}

/// CSRF token settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// How long an issued token stays valid if it is never used.
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// IP reputation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IpGuardConfig {
    /// Violations within one window that trigger an automatic block.
    pub violation_threshold: u64,

    /// Sliding window for violation counting. Each violation restarts it.
    #[serde(with = "humantime_serde")]
    pub violation_window: Duration,

    /// How long an automatic block lasts.
    #[serde(with = "humantime_serde")]
    pub block_duration: Duration,
}

impl Default for IpGuardConfig {
    fn default() -> Self {
        Self {
            violation_threshold: 10,
            violation_window: Duration::from_secs(3600),    // 1 hour
            block_duration: Duration::from_secs(24 * 3600), // 24 hours
        }
    }
}

/// Audit trail settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Store key holding the trail.
    pub key: String,

    /// Maximum number of entries kept; older entries are discarded.
    pub max_entries: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            key: "audit:trail".to_string(),
            max_entries: DEFAULT_AUDIT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// The configuration sources could not be read or merged.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// Rejects durations that are not a positive whole number of seconds the store accepts.
fn whole_seconds(name: &str, value: Duration) -> Result<(), ConfigError> {
    if value.as_secs() == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be at least 1s"
        )));
    }
    if value.as_secs() > MAX_TTL_SECS {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be at most {MAX_TTL_SECS}s"
        )));
    }
    if value.subsec_nanos() != 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be a whole number of seconds"
        )));
    }
    Ok(())
}

impl SecurityConfig {
    /// Validates the configuration.
    ///
    /// The Redis URL is deliberately not checked here: a malformed URL makes
    /// the store factory fall back to the in-process store instead of
    /// refusing to start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis.max_retry_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "redis.max_retry_attempts must be > 0".to_string(),
            ));
        }

        whole_seconds("csrf.token_ttl", self.csrf.token_ttl)?;
        whole_seconds("ip_guard.violation_window", self.ip_guard.violation_window)?;
        whole_seconds("ip_guard.block_duration", self.ip_guard.block_duration)?;

        if self.ip_guard.violation_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "ip_guard.violation_threshold must be > 0".to_string(),
            ));
        }

        if self.audit.key.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "audit.key must not be empty".to_string(),
            ));
        }
        if self.audit.max_entries == 0 {
            return Err(ConfigError::InvalidValue(
                "audit.max_entries must be > 0".to_string(),
            ));
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(ConfigError::InvalidValue(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }

        Ok(())
    }
}

pub mod loader {
    use super::{ConfigError, SecurityConfig};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Loads configuration from an optional TOML file plus `OCTOGUARD__*`
    /// environment overrides, then validates it.
    pub fn load_config(path: Option<&str>) -> Result<SecurityConfig, ConfigError> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or("octoguard.toml"));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(ConfigError::Load(format!(
                "config file '{}' not found",
                file.display()
            )));
        }

        // Environment variable overrides, e.g., OCTOGUARD__IP_GUARD__VIOLATION_THRESHOLD=20
        builder = builder.add_source(
            Environment::with_prefix("OCTOGUARD")
                .try_parsing(true)
                .separator("__"),
        );

        let merged: SecurityConfig = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;

        merged.validate()?;
        Ok(merged)
    }
}
