//! Configuration for the replication worker.

use crate::error::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for applying jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Drop the shipped primary key on create so the target assigns its
    /// own. Natural-keyed types always do.
    pub nullify_primary_key_on_create: bool,
    /// Field that receives the source primary key on create and is used to
    /// resolve primary-key identities, when declared on the entity type.
    pub legacy_primary_key_field: Option<String>,
    /// Retry configuration.
    pub retry: RetryConfig,
    /// How long an idle async runner waits before polling the queue again.
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
}

impl WorkerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            nullify_primary_key_on_create: false,
            legacy_primary_key_field: None,
            retry: RetryConfig::default(),
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Parses and validates a JSON configuration. Missing keys take their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a configuration or the
    /// configuration is invalid.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the options fit together.
    ///
    /// Reassigning primary keys on create requires a legacy primary-key
    /// field, since it is the only way to find those rows again by their
    /// source key.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.legacy_primary_key_field.as_deref() {
            Some(field) if field.trim().is_empty() => {
                return Err(ConfigError::Invalid(
                    "legacy_primary_key_field must not be empty".into(),
                ));
            }
            None if self.nullify_primary_key_on_create => {
                return Err(ConfigError::Invalid(
                    "nullify_primary_key_on_create requires legacy_primary_key_field".into(),
                ));
            }
            _ => {}
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Sets whether creates drop the shipped primary key.
    pub fn with_nullify_primary_key_on_create(mut self, nullify: bool) -> Self {
        self.nullify_primary_key_on_create = nullify;
        self
    }

    /// Sets the legacy primary-key field.
    pub fn with_legacy_primary_key_field(mut self, field: impl Into<String>) -> Self {
        self.legacy_primary_key_field = Some(field.into());
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of deliveries of one job, the first included.
    pub max_attempts: u32,
    /// Delay before the first redelivery.
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    /// Maximum delay between deliveries.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self::immediate(1)
    }

    /// Creates a configuration that redelivers without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the maximum number of deliveries.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Returns true if a job that failed on delivery `attempt` (1-based)
    /// may be delivered again.
    pub fn allows_another(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Calculates the delay after the given failed delivery (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Uniform jitter in `[0, 1)`.
fn rand_jitter() -> f64 {
    rand::thread_rng().gen::<f64>()
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
