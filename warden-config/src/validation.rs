//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate an optional limit: unset is fine, a set value must be positive and finite
pub fn validate_optional_limit(value: Option<f64>, field_name: &str, domain: &str) -> ConfigResult<()> {
    match value {
        Some(v) if !v.is_finite() || v <= 0.0 => Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be a positive finite number, got {}", field_name, v),
        }),
        _ => Ok(()),
    }
}
