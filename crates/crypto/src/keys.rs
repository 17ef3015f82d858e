//! Symmetric key pair handling

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::derivation::derive_fresh;

/// Errors raised when a key pair violates its invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("{0} key is empty")]
    EmptyKey(&'static str),

    #[error("primary and secondary keys must differ")]
    DuplicateKeys,
}

/// Primary/secondary symmetric credential pair.
///
/// Both keys are non-empty and distinct. Key material is wiped on drop and
/// never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(try_from = "RawKeyPair", into = "RawKeyPair")]
pub struct KeyPair {
    primary: String,
    secondary: String,
}

#[derive(Serialize, Deserialize)]
struct RawKeyPair {
    primary: String,
    secondary: String,
}

impl KeyPair {
    /// Build a key pair from existing material, checking invariants.
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Result<Self, KeyError> {
        let primary = primary.into();
        let secondary = secondary.into();

        if primary.is_empty() {
            return Err(KeyError::EmptyKey("primary"));
        }
        if secondary.is_empty() {
            return Err(KeyError::EmptyKey("secondary"));
        }
        if primary == secondary {
            return Err(KeyError::DuplicateKeys);
        }

        Ok(Self { primary, secondary })
    }

    /// Mint a fresh pair from two independent random seeds.
    pub fn generate() -> Self {
        loop {
            if let Ok(pair) = Self::new(derive_fresh(), derive_fresh()) {
                return pair;
            }
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn secondary(&self) -> &str {
        &self.secondary
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("primary", &"<redacted>")
            .field("secondary", &"<redacted>")
            .finish()
    }
}

impl TryFrom<RawKeyPair> for KeyPair {
    type Error = KeyError;

    fn try_from(raw: RawKeyPair) -> Result<Self, Self::Error> {
        Self::new(raw.primary, raw.secondary)
    }
}

impl From<KeyPair> for RawKeyPair {
    fn from(pair: KeyPair) -> Self {
        Self {
            primary: pair.primary.clone(),
            secondary: pair.secondary.clone(),
        }
    }
}
