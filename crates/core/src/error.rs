//! Core error types

use thiserror::Error;

/// Core error type for iotprov
#[derive(Debug, Error)]
pub enum Error {
    /// A required configuration field is missing or empty
    #[error("Missing configuration: {0}")]
    MissingConfig(&'static str),

    /// A configuration field has an unusable value
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
