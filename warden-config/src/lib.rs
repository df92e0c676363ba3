//! Domain-driven configuration management for Warden
//!
//! Configuration is split by functional domain, with validation, defaults,
//! YAML file loading and `WARDEN_*` environment variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    execution::ExecutionConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    WardenConfig,
};
