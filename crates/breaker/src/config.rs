//! Breaker configuration and policies.
//!
//! [`BreakerConfig`] holds the plain, serializable knobs. [`BreakerSettings`]
//! pairs a validated config with the three caller-supplied policies: when to
//! trip, which action errors count as failures, and who to tell about
//! transitions.

use std::{fmt, sync::Arc, time::Duration};

use distbreaker_storage::ConfigError;
use serde::{Deserialize, Serialize};

use crate::{state::Phase, window::Counts};

/// Default namespace for breaker keys.
pub const DEFAULT_PREFIX: &str = "circuit_breaker";

/// Default expiry of every breaker key (5 minutes).
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(5 * 60);

/// Default width of the sliding counting window (1 minute).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Default length of the open period (10 seconds).
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// The default trip policy fires once more than this many consecutive
/// failures are in the window.
pub const DEFAULT_CONSECUTIVE_FAILURES: u64 = 5;

/// Error type returned by a state-change notifier.
pub type NotifyError = Box<dyn std::error::Error + Send + Sync>;

type TripPolicy = Arc<dyn Fn(&Counts) -> bool + Send + Sync>;
type SuccessClassifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type StateChangeNotifier = Arc<dyn Fn(Phase, Phase) -> Result<(), NotifyError> + Send + Sync>;

/// Serializable breaker configuration.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use distbreaker::BreakerConfig;
///
/// let config = BreakerConfig::builder()
///     .prefix("payments")
///     .open_timeout(Duration::from_secs(30))
///     .build()?;
/// assert_eq!(config.prefix(), "payments");
/// assert_eq!(config.interval(), Duration::from_secs(60));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
///
/// From a configuration file, with humantime durations:
///
/// ```json
/// { "prefix": "payments", "key_ttl": "10m", "interval": "30s", "open_timeout": "5s" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    /// Namespace of every breaker key.
    #[serde(default = "default_prefix")]
    pub(crate) prefix: String,

    /// Expiry refreshed on every write; an idle breaker reverts to closed
    /// once its keys expire.
    #[serde(with = "humantime_serde", default = "default_key_ttl")]
    pub(crate) key_ttl: Duration,

    /// Width of the sliding window events are counted in.
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub(crate) interval: Duration,

    /// How long the breaker stays open before a trial is allowed.
    #[serde(with = "humantime_serde", default = "default_open_timeout")]
    pub(crate) open_timeout: Duration,
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_owned()
}

fn default_key_ttl() -> Duration {
    DEFAULT_KEY_TTL
}

fn default_interval() -> Duration {
    DEFAULT_INTERVAL
}

fn default_open_timeout() -> Duration {
    DEFAULT_OPEN_TIMEOUT
}

fn ignore_transition(_: Phase, _: Phase) -> Result<(), NotifyError> {
    Ok(())
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            key_ttl: DEFAULT_KEY_TTL,
            interval: DEFAULT_INTERVAL,
            open_timeout: DEFAULT_OPEN_TIMEOUT,
        }
    }
}

#[bon::bon]
impl BreakerConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `prefix` - Key namespace (default: `circuit_breaker`).
    /// * `key_ttl` - Key expiry (default: 5 minutes).
    /// * `interval` - Counting window (default: 1 minute).
    /// * `open_timeout` - Open period (default: 10 seconds).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the prefix is empty, any duration is zero,
    /// or `key_ttl` is shorter than `open_timeout`.
    #[builder]
    pub fn new(
        #[builder(into)] prefix: Option<String>,
        #[builder(default = DEFAULT_KEY_TTL)] key_ttl: Duration,
        #[builder(default = DEFAULT_INTERVAL)] interval: Duration,
        #[builder(default = DEFAULT_OPEN_TIMEOUT)] open_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            prefix: prefix.unwrap_or_else(default_prefix),
            key_ttl,
            interval,
            open_timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the invariants enforced by the builder.
    ///
    /// Deserialized configurations bypass the builder;
    /// [`BreakerSettings::new`] validates before accepting one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the prefix is empty, any duration is zero,
    /// or `key_ttl` is shorter than `open_timeout`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.trim().is_empty() {
            return Err(ConfigError::Empty { field: "prefix" });
        }
        for (field, value) in [
            ("key_ttl", self.key_ttl),
            ("interval", self.interval),
            ("open_timeout", self.open_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::MustBePositive { field, value: "0s".into() });
            }
        }
        // The state key must outlive the period it records.
        if self.key_ttl < self.open_timeout {
            return Err(ConfigError::BelowMinimum {
                field: "key_ttl",
                min: format!("{:?}", self.open_timeout),
                value: format!("{:?}", self.key_ttl),
            });
        }
        Ok(())
    }

    /// Returns the key namespace.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the key expiry.
    #[must_use]
    pub fn key_ttl(&self) -> Duration {
        self.key_ttl
    }

    /// Returns the counting window width.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the open period length.
    #[must_use]
    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }
}

/// A validated [`BreakerConfig`] plus the breaker's policies.
///
/// `E` is the error type of the protected actions.
///
/// ```
/// use distbreaker::{BreakerConfig, BreakerSettings};
///
/// let settings = BreakerSettings::<std::io::Error>::new(BreakerConfig::default())?
///     .with_ready_to_trip(|counts| counts.total_failures > 10)
///     .with_success_classifier(|err| err.kind() == std::io::ErrorKind::NotFound)
///     .with_state_change(|from, to| {
///         println!("breaker moved from {from} to {to}");
///         Ok(())
///     });
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct BreakerSettings<E> {
    config: BreakerConfig,
    ready_to_trip: TripPolicy,
    is_successful: SuccessClassifier<E>,
    on_state_change: StateChangeNotifier,
}

impl<E> BreakerSettings<E> {
    /// Wraps `config` with the default policies.
    ///
    /// By default the breaker trips when more than
    /// [`DEFAULT_CONSECUTIVE_FAILURES`] consecutive failures are counted,
    /// every action error is a failure, and transitions are not reported.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails [`BreakerConfig::validate`].
    pub fn new(config: BreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, ..Self::default() })
    }

    /// Replaces the trip policy, evaluated on the counts of a closed breaker.
    #[must_use]
    pub fn with_ready_to_trip(
        mut self,
        policy: impl Fn(&Counts) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.ready_to_trip = Arc::new(policy);
        self
    }

    /// Replaces the classifier deciding whether an action error still counts
    /// as a success. `Ok` results are always successes.
    #[must_use]
    pub fn with_success_classifier(
        mut self,
        classifier: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.is_successful = Arc::new(classifier);
        self
    }

    /// Replaces the notifier called with `(from, to)` after every committed
    /// transition. Its errors are logged and never undo the transition.
    #[must_use]
    pub fn with_state_change(
        mut self,
        notifier: impl Fn(Phase, Phase) -> Result<(), NotifyError> + Send + Sync + 'static,
    ) -> Self {
        self.on_state_change = Arc::new(notifier);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub(crate) fn ready_to_trip(&self, counts: &Counts) -> bool {
        (self.ready_to_trip)(counts)
    }

    pub(crate) fn is_success<T>(&self, result: &Result<T, E>) -> bool {
        match result {
            Ok(_) => true,
            Err(err) => (self.is_successful)(err),
        }
    }

    pub(crate) fn notify(&self, from: Phase, to: Phase) {
        if let Err(error) = (self.on_state_change)(from, to) {
            tracing::warn!(
                previous_state = %from,
                new_state = %to,
                error = %error,
                "state change notifier failed",
            );
        }
    }
}

impl<E> Default for BreakerSettings<E> {
    fn default() -> Self {
        Self {
            config: BreakerConfig::default(),
            ready_to_trip: Arc::new(|counts: &Counts| {
                counts.consecutive_failures > DEFAULT_CONSECUTIVE_FAILURES
            }),
            is_successful: Arc::new(|_: &E| false),
            on_state_change: Arc::new(ignore_transition),
        }
    }
}

impl<E> Clone for BreakerSettings<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            ready_to_trip: Arc::clone(&self.ready_to_trip),
            is_successful: Arc::clone(&self.is_successful),
            on_state_change: Arc::clone(&self.on_state_change),
        }
    }
}

impl<E> fmt::Debug for BreakerSettings<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerSettings").field("config", &self.config).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::Mutex;

    use rstest::rstest;

    use super::*;

    #[test]
    fn config_defaults_pass_validation() {
        let config = BreakerConfig::builder().build().unwrap();
        assert_eq!(config, BreakerConfig::default());
        assert_eq!(config.prefix(), DEFAULT_PREFIX);
        assert_eq!(config.key_ttl(), DEFAULT_KEY_TTL);
        assert_eq!(config.interval(), DEFAULT_INTERVAL);
        assert_eq!(config.open_timeout(), DEFAULT_OPEN_TIMEOUT);
    }

    #[rstest]
    #[case::zero_key_ttl("key_ttl")]
    #[case::zero_interval("interval")]
    #[case::zero_open_timeout("open_timeout")]
    fn config_zero_duration_rejected(#[case] field: &str) {
        let result = match field {
            "key_ttl" => BreakerConfig::builder().key_ttl(Duration::ZERO).build(),
            "interval" => BreakerConfig::builder().interval(Duration::ZERO).build(),
            "open_timeout" => BreakerConfig::builder().open_timeout(Duration::ZERO).build(),
            _ => unreachable!(),
        };
        match result.unwrap_err() {
            ConfigError::MustBePositive { field: actual, value } => {
                assert_eq!(actual, field);
                assert_eq!(value, "0s");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    #[case::empty("")]
    #[case::whitespace("  ")]
    fn config_empty_prefix_rejected(#[case] prefix: &str) {
        let result = BreakerConfig::builder().prefix(prefix).build();
        assert_eq!(result.unwrap_err(), ConfigError::Empty { field: "prefix" });
    }

    #[test]
    fn config_key_ttl_shorter_than_open_timeout_rejected() {
        let result = BreakerConfig::builder()
            .key_ttl(Duration::from_secs(5))
            .open_timeout(Duration::from_secs(10))
            .build();
        assert_eq!(
            result.unwrap_err(),
            ConfigError::BelowMinimum { field: "key_ttl", min: "10s".into(), value: "5s".into() }
        );
    }

    #[test]
    fn config_key_ttl_equal_to_open_timeout_accepted() {
        let config = BreakerConfig::builder()
            .key_ttl(Duration::from_secs(10))
            .open_timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        assert_eq!(config.key_ttl(), config.open_timeout());
    }

    #[test]
    fn config_deserializes_humantime_durations() {
        let config: BreakerConfig = serde_json::from_str(
            r#"{ "prefix": "svc", "key_ttl": "10m", "interval": "30s", "open_timeout": "250ms" }"#,
        )
        .unwrap();
        assert_eq!(config.prefix(), "svc");
        assert_eq!(config.key_ttl(), Duration::from_secs(600));
        assert_eq!(config.interval(), Duration::from_secs(30));
        assert_eq!(config.open_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn config_deserialize_fills_defaults() {
        let config: BreakerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BreakerConfig::default());
    }

    #[test]
    fn config_deserialize_rejects_unknown_fields() {
        let result = serde_json::from_str::<BreakerConfig>(r#"{ "threshold": 3 }"#);
        assert!(result.is_err());
    }

    #[test]
    fn settings_reject_invalid_deserialized_config() {
        let config: BreakerConfig = serde_json::from_str(r#"{ "interval": "0s" }"#).unwrap();
        let err = BreakerSettings::<()>::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::MustBePositive { field: "interval", .. }));

        let config: BreakerConfig = serde_json::from_str(r#"{ "key_ttl": "1s" }"#).unwrap();
        let err = BreakerSettings::<()>::new(config).unwrap_err();
        assert!(matches!(err, ConfigError::BelowMinimum { field: "key_ttl", .. }));
    }

    #[test]
    fn default_trip_policy_needs_more_than_five_consecutive_failures() {
        let settings = BreakerSettings::<()>::default();
        let mut counts = Counts { consecutive_failures: 5, ..Counts::default() };
        assert!(!settings.ready_to_trip(&counts));
        counts.consecutive_failures = 6;
        assert!(settings.ready_to_trip(&counts));
    }

    #[test]
    fn default_classifier_treats_every_error_as_failure() {
        let settings = BreakerSettings::<&str>::default();
        assert!(settings.is_success(&Ok::<_, &str>(1)));
        assert!(!settings.is_success(&Err::<i32, _>("boom")));
    }

    #[test]
    fn custom_classifier_can_accept_errors() {
        let settings = BreakerSettings::<&str>::default()
            .with_success_classifier(|err: &&str| *err == "not found");
        assert!(settings.is_success(&Err::<(), _>("not found")));
        assert!(!settings.is_success(&Err::<(), _>("timeout")));
    }

    #[test]
    fn notifier_receives_transition_and_errors_are_swallowed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let settings = BreakerSettings::<()>::default().with_state_change(move |from, to| {
            sink.lock().unwrap().push((from, to));
            Err("listener unavailable".into())
        });

        settings.notify(Phase::Closed, Phase::Open);
        assert_eq!(*seen.lock().unwrap(), vec![(Phase::Closed, Phase::Open)]);
    }

    #[test]
    fn settings_clone_shares_policies() {
        let settings = BreakerSettings::<()>::default().with_ready_to_trip(|_| true);
        let cloned = settings.clone();
        assert!(cloned.ready_to_trip(&Counts::default()));
        assert_eq!(cloned.config(), settings.config());
    }

    #[test]
    fn settings_debug_shows_config() {
        let rendered = format!("{:?}", BreakerSettings::<()>::default());
        assert!(rendered.contains("circuit_breaker"));
    }
}
