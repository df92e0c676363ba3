//! Domain-specific configuration modules

pub mod execution;
pub mod logging;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Warden configuration combining all domains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WardenConfig {
    /// Process pool and resource limits
    #[serde(default)]
    pub execution: execution::ExecutionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl WardenConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.execution.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Render the configuration as YAML
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        WardenConfig::default()
            .to_yaml()
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_parses_back() {
        let sample = WardenConfig::generate_sample();
        let parsed: WardenConfig = serde_yaml::from_str(&sample).unwrap();
        assert_eq!(parsed, WardenConfig::default());
        assert!(parsed.validate_all().is_ok());
    }

    #[test]
    fn test_empty_document_is_all_defaults() {
        let parsed: WardenConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(parsed, WardenConfig::default());
    }
}
