//! Process pool configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domains::utils::{millis, optional_secs};
use crate::error::ConfigResult;
use crate::validation::{validate_optional_limit, validate_positive, Validatable};

/// Process pool and per-task resource limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Maximum number of concurrently running tasks; unset means one per CPU
    pub max_workers: Option<usize>,

    /// Per-task wall-clock budget in seconds; unset means unlimited
    pub worker_timeout_seconds: Option<f64>,

    /// Per-task resident memory budget in GiB; unset means unlimited
    pub memory_limit_gib: Option<f64>,

    /// How long the manager sleeps when no result is ready (0 = busy poll)
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,

    /// Watcher polling cadence for worker liveness and timeout
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Watcher polling cadence for memory sampling
    #[serde(default = "default_memory_poll_interval_ms")]
    pub memory_poll_interval_ms: u64,

    /// How long a watcher waits for a result after its worker exits
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// Size budget for a single result sent upstream
    #[serde(default = "default_max_result_bytes")]
    pub max_result_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            worker_timeout_seconds: None,
            memory_limit_gib: None,
            idle_interval_ms: default_idle_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            memory_poll_interval_ms: default_memory_poll_interval_ms(),
            drain_grace_ms: default_drain_grace_ms(),
            max_result_bytes: default_max_result_bytes(),
        }
    }
}

impl ExecutionConfig {
    /// Effective worker count
    pub fn resolved_max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        optional_secs(self.worker_timeout_seconds)
    }

    pub fn idle_interval(&self) -> Duration {
        millis(self.idle_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        millis(self.poll_interval_ms)
    }

    pub fn memory_poll_interval(&self) -> Duration {
        millis(self.memory_poll_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        millis(self.drain_grace_ms)
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(max_workers) = self.max_workers {
            validate_positive(max_workers, "max_workers", self.domain_name())?;
        }

        validate_optional_limit(
            self.worker_timeout_seconds,
            "worker_timeout_seconds",
            self.domain_name(),
        )?;
        validate_optional_limit(self.memory_limit_gib, "memory_limit_gib", self.domain_name())?;

        validate_positive(self.poll_interval_ms, "poll_interval_ms", self.domain_name())?;
        validate_positive(
            self.memory_poll_interval_ms,
            "memory_poll_interval_ms",
            self.domain_name(),
        )?;
        validate_positive(self.drain_grace_ms, "drain_grace_ms", self.domain_name())?;
        validate_positive(self.max_result_bytes, "max_result_bytes", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

// Default value functions
fn default_idle_interval_ms() -> u64 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_memory_poll_interval_ms() -> u64 {
    100
}

fn default_drain_grace_ms() -> u64 {
    250
}

fn default_max_result_bytes() -> usize {
    8192
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_config_defaults() {
        let config = ExecutionConfig::default();
        assert!(config.max_workers.is_none());
        assert!(config.worker_timeout().is_none());
        assert!(config.memory_limit_gib.is_none());
        assert_eq!(config.idle_interval(), Duration::from_millis(1));
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.memory_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.drain_grace(), Duration::from_millis(250));
        assert_eq!(config.max_result_bytes, 8192);
        assert!(config.resolved_max_workers() >= 1);
    }

    #[test]
    fn test_explicit_max_workers_wins() {
        let config = ExecutionConfig {
            max_workers: Some(3),
            ..Default::default()
        };
        assert_eq!(config.resolved_max_workers(), 3);
    }

    #[test]
    fn test_execution_config_validation() {
        let mut config = ExecutionConfig::default();
        assert!(config.validate().is_ok());

        config.max_workers = Some(0);
        assert!(config.validate().is_err());
        config.max_workers = Some(2);

        config.worker_timeout_seconds = Some(0.0);
        assert!(config.validate().is_err());
        config.worker_timeout_seconds = Some(0.5);
        assert!(config.validate().is_ok());

        config.memory_limit_gib = Some(-1.0);
        assert!(config.validate().is_err());
        config.memory_limit_gib = Some(1.0);

        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());
        config.poll_interval_ms = 1;

        config.max_result_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_idle_interval_is_allowed() {
        let config = ExecutionConfig {
            idle_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.idle_interval(), Duration::ZERO);
    }

    #[test]
    fn test_fractional_timeout() {
        let config = ExecutionConfig {
            worker_timeout_seconds: Some(0.25),
            ..Default::default()
        };
        assert_eq!(config.worker_timeout(), Some(Duration::from_millis(250)));
    }
}
