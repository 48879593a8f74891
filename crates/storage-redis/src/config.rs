//! Configuration for the Redis storage backend.

use std::time::Duration;

use distbreaker_storage::ConfigError;
use serde::{Deserialize, Serialize};

/// Default per-round-trip timeout (5 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`RedisBackend`](crate::RedisBackend).
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use distbreaker_storage_redis::RedisBackendConfig;
///
/// let config = RedisBackendConfig::builder()
///     .url("redis://127.0.0.1:6379")
///     .timeout(Duration::from_secs(2))
///     .build()?;
/// assert_eq!(config.timeout(), Duration::from_secs(2));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// Loaded from a configuration file, durations use humantime notation:
///
/// ```json
/// { "url": "redis://cache:6379", "timeout": "750ms" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisBackendConfig {
    /// Connection URL, e.g. `redis://host:6379/0`.
    pub(crate) url: String,

    /// Upper bound on every round trip to the server.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub(crate) timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

#[bon::bon]
impl RedisBackendConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL.
    ///
    /// # Optional Fields
    ///
    /// * `timeout` - Per-round-trip timeout (default: 5 seconds).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is empty or the timeout is zero.
    #[builder]
    pub fn new(
        #[builder(into)] url: String,
        #[builder(default = DEFAULT_TIMEOUT)] timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { url, timeout };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the invariants enforced by the builder.
    ///
    /// Configurations obtained through `serde` bypass the builder, so callers
    /// loading from files should validate before use;
    /// [`RedisBackend::new`](crate::RedisBackend::new) does so itself.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the URL is empty or the timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Empty { field: "url" });
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "timeout",
                value: format!("{:?}", self.timeout),
            });
        }
        Ok(())
    }

    /// Returns the connection URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the per-round-trip timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
