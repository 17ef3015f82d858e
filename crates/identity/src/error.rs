//! Error types for iotprov identity operations.
//!
//! Two layers: [`RegistryError`] is what a registry client reports for a
//! single remote call; [`ProvisioningError`] is the classified outcome an
//! orchestrator hands back to its caller.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Which external registry a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryKind {
    /// Enrollment records and assignment brokering
    Provisioning,
    /// Per-device identity, credentials and twins (hub)
    Device,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryKind::Provisioning => f.write_str("provisioning registry"),
            RegistryKind::Device => f.write_str("device registry"),
        }
    }
}

/// Failure of a single registry call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// eTag presented with a conditional write is stale
    #[error("eTag conflict: {0}")]
    Conflict(String),

    /// Network failure, throttling or service outage
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// Call did not complete within the configured timeout
    #[error("Registry call timed out after {0:?}")]
    Timeout(Duration),

    /// Request refused by the registry; retrying will not help
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl RegistryError {
    /// Whether repeating the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistryError::Unavailable(_) | RegistryError::Timeout(_) | RegistryError::Conflict(_)
        )
    }
}

/// Classified failure of an enrollment, rotation, repair or twin update.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Record absent where the operation required it
    #[error("{registry}: {registration_id} not found")]
    NotFound {
        registry: RegistryKind,
        registration_id: String,
    },

    /// Identity has no enrollment, or its enrollment is not bound to a hub yet
    #[error("{registration_id} is not fully enrolled")]
    NotEnrolled { registration_id: String },

    /// Network, timeout or quota failure; nothing was left half-done
    #[error("Transient {registry} failure: {source}")]
    TransientRegistry {
        registry: RegistryKind,
        #[source]
        source: RegistryError,
    },

    /// Optimistic concurrency check kept failing
    #[error("eTag conflict on {registration_id} after {attempts} attempt(s)")]
    Conflict {
        registration_id: String,
        attempts: u32,
    },

    /// Enrollment exists but the device has not been assigned to a hub.
    /// Calling `enroll` again resumes with the persisted keys.
    #[error("Enrollment of {registration_id} created but hub assignment failed: {source}")]
    PartialEnrollment {
        registration_id: String,
        retryable: bool,
        #[source]
        source: RegistryError,
    },

    /// Provisioning registry holds new keys, device registry still holds the
    /// old ones. Run a repair pass; do not rotate again.
    #[error("Rotation of {registration_id} left registries out of sync: {source}")]
    PartialRotation {
        registration_id: String,
        #[source]
        source: RegistryError,
    },

    /// Device is enrolled but the two registries hold different keys.
    /// Run a repair pass.
    #[error("{registration_id} is enrolled but the registries hold different keys")]
    RegistriesOutOfSync { registration_id: String },

    /// Registry refused the request
    #[error("{registry} rejected request: {source}")]
    Rejected {
        registry: RegistryKind,
        #[source]
        source: RegistryError,
    },

    /// Malformed identifier or missing connection parameters
    #[error("Configuration error: {0}")]
    FatalConfiguration(String),
}

impl ProvisioningError {
    /// Classify a registry failure that happened with no partial state.
    pub fn from_registry(
        registry: RegistryKind,
        registration_id: impl Into<String>,
        source: RegistryError,
    ) -> Self {
        match source {
            RegistryError::NotFound(_) => ProvisioningError::NotFound {
                registry,
                registration_id: registration_id.into(),
            },
            RegistryError::Conflict(_) => ProvisioningError::Conflict {
                registration_id: registration_id.into(),
                attempts: 1,
            },
            RegistryError::Unavailable(_) | RegistryError::Timeout(_) => {
                ProvisioningError::TransientRegistry { registry, source }
            }
            RegistryError::Rejected(_) => ProvisioningError::Rejected { registry, source },
        }
    }

    /// Whether calling the same operation again is a sound response.
    ///
    /// `PartialRotation` and `RegistriesOutOfSync` need `repair`, not a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProvisioningError::TransientRegistry { .. } | ProvisioningError::Conflict { .. } => {
                true
            }
            ProvisioningError::PartialEnrollment { retryable, .. } => *retryable,
            ProvisioningError::NotFound { .. }
            | ProvisioningError::NotEnrolled { .. }
            | ProvisioningError::PartialRotation { .. }
            | ProvisioningError::RegistriesOutOfSync { .. }
            | ProvisioningError::Rejected { .. }
            | ProvisioningError::FatalConfiguration(_) => false,
        }
    }
}

impl From<iotprov_core::Error> for ProvisioningError {
    fn from(err: iotprov_core::Error) -> Self {
        ProvisioningError::FatalConfiguration(err.to_string())
    }
}

/// Result type for provisioning operations.
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;
