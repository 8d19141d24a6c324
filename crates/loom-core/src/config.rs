//! Scheduler configuration, loadable from TOML.
//!
//! ```toml
//! default_max_attempts = 5
//! job_timeout_ms = 120000
//! fairness = "round_robin_by_account"
//!
//! [concurrency]
//! max_global = 4
//! max_per_account = 2
//!
//! [backoff]
//! base_delay_ms = 30000
//! ```
//!
//! Missing keys take their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::{ConcurrencyLimits, FairnessPolicy, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 30_000,
            max_delay_ms: 7_680_000,
            jitter_ratio: RetryPolicy::DEFAULT_JITTER_RATIO,
        }
    }
}

impl BackoffConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
        .with_jitter_ratio(self.jitter_ratio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Used when a request does not set its own ceiling.
    pub default_max_attempts: u32,

    /// Per-attempt deadline for one collaborator call.
    pub job_timeout_ms: u64,

    /// How many due jobs are read per dispatch pass.
    pub candidate_window: usize,

    /// A job `running` for longer than this is treated as interrupted.
    /// At least twice `job_timeout_ms`.
    pub stale_after_ms: u64,

    pub fairness: FairnessPolicy,
    pub concurrency: ConcurrencyLimits,
    pub backoff: BackoffConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: 5,
            job_timeout_ms: 120_000,
            candidate_window: 40,
            stale_after_ms: 900_000,
            fairness: FairnessPolicy::default(),
            concurrency: ConcurrencyLimits::default(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path)?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.default_max_attempts < 1 {
            return invalid("default_max_attempts must be >= 1".into());
        }
        if self.job_timeout_ms < 1 {
            return invalid("job_timeout_ms must be >= 1".into());
        }
        if self.candidate_window < 1 {
            return invalid("candidate_window must be >= 1".into());
        }
        let limits = [
            ("max_global", self.concurrency.max_global),
            ("max_per_domain", self.concurrency.max_per_domain),
            ("max_per_account", self.concurrency.max_per_account),
            ("max_per_account_domain", self.concurrency.max_per_account_domain),
        ];
        for (name, value) in limits {
            if value < 1 {
                return invalid(format!("concurrency.{name} must be >= 1"));
            }
        }
        if self.backoff.base_delay_ms < 1 {
            return invalid("backoff.base_delay_ms must be >= 1".into());
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return invalid(format!(
                "backoff.max_delay_ms ({}) must be >= base_delay_ms ({})",
                self.backoff.max_delay_ms, self.backoff.base_delay_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_ratio) {
            return invalid(format!(
                "backoff.jitter_ratio must be within [0, 1], got {}",
                self.backoff.jitter_ratio
            ));
        }
        // Leaves a full timeout of slack for the completion write.
        if self.stale_after_ms < self.job_timeout_ms.saturating_mul(2) {
            return invalid(format!(
                "stale_after_ms ({}) must be at least twice job_timeout_ms ({})",
                self.stale_after_ms, self.job_timeout_ms
            ));
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.backoff.retry_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = SchedulerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.concurrency.max_global, 4);
        assert_eq!(config.concurrency.max_per_account_domain, 1);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            job_timeout_ms = 5000
            fairness = "oldest_first"

            [concurrency]
            max_global = 8

            [backoff]
            jitter_ratio = 0.0
            "#,
        )
        .unwrap();

        assert_eq!(config.job_timeout(), Duration::from_secs(5));
        assert_eq!(config.fairness, FairnessPolicy::OldestFirst);
        assert_eq!(config.concurrency.max_global, 8);
        assert_eq!(config.concurrency.max_per_account, 2);
        assert_eq!(config.backoff.base_delay_ms, 30_000);
        assert_eq!(config.default_max_attempts, 5);
    }

    #[rstest]
    #[case("default_max_attempts = 0")]
    #[case("candidate_window = 0")]
    #[case("[concurrency]\nmax_per_account = 0")]
    #[case("[backoff]\nbase_delay_ms = 0")]
    #[case("[backoff]\nbase_delay_ms = 1000\nmax_delay_ms = 10")]
    #[case("[backoff]\njitter_ratio = 1.5")]
    #[case("job_timeout_ms = 1000000")]
    #[case("job_timeout_ms = 1000\nstale_after_ms = 1500")]
    fn invalid_values_are_rejected(#[case] input: &str) {
        let err = SchedulerConfig::from_toml_str(input).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{input}: {err}");
    }

    #[test]
    fn stale_after_may_be_exactly_twice_the_timeout() {
        let config =
            SchedulerConfig::from_toml_str("job_timeout_ms = 1000\nstale_after_ms = 2000").unwrap();
        assert_eq!(config.stale_after(), Duration::from_secs(2));
    }

    #[test]
    fn unknown_fairness_is_a_parse_error() {
        let err = SchedulerConfig::from_toml_str(r#"fairness = "random""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loom.toml");
        std::fs::write(&path, "candidate_window = 10\n").unwrap();

        let config = SchedulerConfig::load(&path).unwrap();
        assert_eq!(config.candidate_window, 10);
    }
}
