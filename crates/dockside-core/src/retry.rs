//! Readiness retry budget

use crate::{HarnessError, Result};
use dockside_config::{ConfigError, ReadinessConfig, DEFAULT_READY_INTERVAL_MS, DEFAULT_READY_TRIES};
use std::time::Duration;

/// How many times to probe a container, and how long to sleep in between.
///
/// The controller sleeps only between attempts, so the time spent waiting is
/// `(max_attempts - 1) * interval` and never more than [`RetryPolicy::budget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(HarnessError::Config(ConfigError::Invalid(
                "retry policy needs at least one attempt".to_string(),
            )));
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }

    pub fn from_config(config: &ReadinessConfig) -> Result<Self> {
        Self::new(config.tries, config.interval())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound on the time spent sleeping between probe attempts
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_READY_TRIES,
            interval: Duration::from_millis(DEFAULT_READY_INTERVAL_MS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_attempts_rejected() {
        let err = RetryPolicy::new(0, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_budget() {
        let policy = RetryPolicy::new(10, Duration::from_secs(3)).unwrap();
        assert_eq!(policy.budget(), Duration::from_secs(30));
        assert_eq!(RetryPolicy::default(), policy);
    }

    #[test]
    fn test_zero_interval_allowed() {
        let policy = RetryPolicy::new(1, Duration::ZERO).unwrap();
        assert_eq!(policy.budget(), Duration::ZERO);
    }

    #[test]
    fn test_from_config() {
        let config = ReadinessConfig {
            tries: 4,
            interval_ms: 250,
        };
        let policy = RetryPolicy::from_config(&config).unwrap();
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.interval(), Duration::from_millis(250));
    }
}
