//! Core error types

use thiserror::Error;

/// Errors raised while building tasks
#[derive(Debug, Error)]
pub enum CoreError {
    /// A function name was empty
    #[error("Function name cannot be empty")]
    EmptyFunctionName,

    /// An argument could not be normalised into its transferable form
    #[error("Failed to encode argument '{name}': {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Function registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Function '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Function '{0}' is not registered")]
    NotRegistered(String),

    #[error("Invalid function name: {0}")]
    InvalidName(#[from] CoreError),
}

/// Result size guard errors
#[derive(Debug, Error)]
pub enum SizeGuardError {
    /// The object could not be serialized for size estimation
    #[error("Failed to serialize object for size estimation: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Every removable attribute was deleted and the object is still too large
    #[error("Object cannot be reduced below {target} bytes (estimated {size} bytes after deleting {deleted:?})")]
    Irreducible {
        size: usize,
        target: usize,
        deleted: Vec<&'static str>,
    },
}
