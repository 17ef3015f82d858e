//! Credential material for the iotprov provisioning system.
//!
//! This crate mints the symmetric keys that devices present to the
//! provisioning and device registries.
//!
//! # Security Principles
//!
//! - Seeds come from the operating system CSPRNG, never from the registration id
//! - Derivation is SHA-256, lower-case hex, 64 characters
//! - Key material is never logged and is zeroized on drop

pub mod derivation;
pub mod keys;

pub use derivation::{derive, derive_fresh, generate_seed, DERIVED_KEY_LEN, SEED_LEN};
pub use keys::{KeyError, KeyPair};
