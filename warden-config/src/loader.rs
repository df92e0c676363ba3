//! Configuration loading and environment variable handling

use std::path::Path;
use std::str::FromStr;

use crate::domains::execution::ExecutionConfig;
use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::WardenConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "WARDEN".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<WardenConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: WardenConfig = serde_yaml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<WardenConfig> {
        let mut config = WardenConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<WardenConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut WardenConfig) -> ConfigResult<()> {
        self.apply_execution_overrides(&mut config.execution)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply execution config overrides
    fn apply_execution_overrides(&self, config: &mut ExecutionConfig) -> ConfigResult<()> {
        if let Some(max_workers) = self.parse_env_var::<usize>("MAX_WORKERS")? {
            config.max_workers = Some(max_workers);
        }

        if let Some(timeout) = self.parse_env_var::<f64>("WORKER_TIMEOUT_SECONDS")? {
            config.worker_timeout_seconds = Some(timeout);
        }

        if let Some(limit) = self.parse_env_var::<f64>("MEMORY_LIMIT_GIB")? {
            config.memory_limit_gib = Some(limit);
        }

        if let Some(interval) = self.parse_env_var::<u64>("POLL_INTERVAL_MS")? {
            config.poll_interval_ms = interval;
        }

        if let Some(interval) = self.parse_env_var::<u64>("MEMORY_POLL_INTERVAL_MS")? {
            config.memory_poll_interval_ms = interval;
        }

        if let Some(bytes) = self.parse_env_var::<usize>("MAX_RESULT_BYTES")? {
            config.max_result_bytes = bytes;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Parse an environment variable if it is set
    fn parse_env_var<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_env_var(name) {
            Ok(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e))),
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
