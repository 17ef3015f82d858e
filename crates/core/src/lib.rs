//! Core functionality for the iotprov device provisioning system.
//!
//! This crate provides the configuration object, error types, and logging
//! setup shared by the crypto and identity crates.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{ProvisioningConfig, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_MAX_CONFLICT_RETRIES};
pub use error::{Error, Result};
