use std::time::Duration;

use octoguard_storage::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::retry::{BackoffPolicy, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_ATTEMPTS};

const ALLOWED_SCHEMES: [&str; 4] = ["redis", "rediss", "redis+unix", "unix"];

/// Redis connection settings.
///
/// Leaving `url` unset selects the in-process fallback store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: Option<String>,

    /// Attempts per operation before the store reports itself disconnected.
    pub max_retry_attempts: u32,

    /// Delay before the first retry; doubles on each further retry up to 2s.
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_retry_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RedisConfig {
    /// Config pointing at `url` with default retry settings.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// The configured endpoint, ignoring blank strings.
    pub fn endpoint(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    /// Parses and checks the endpoint.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no endpoint is set, it does not parse
    /// as a URL, or its scheme is not a Redis scheme.
    pub fn parsed_endpoint(&self) -> StoreResult<Url> {
        let raw = self
            .endpoint()
            .ok_or_else(|| StoreError::configuration("redis url is not set"))?;
        let url = Url::parse(raw)
            .map_err(|e| StoreError::configuration(format!("invalid redis url: {e}")))?;
        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            return Err(StoreError::configuration(format!(
                "unsupported redis url scheme '{}'",
                url.scheme()
            )));
        }
        Ok(url)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base, self.max_retry_attempts)
    }
}
