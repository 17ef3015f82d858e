//! Client interfaces for the two external registries.
//!
//! Implementations talk to remote services and may fail independently.
//! Orchestrators hold them as `Arc<dyn …>` and wrap every call in
//! [`with_timeout`].

use async_trait::async_trait;
use iotprov_crypto::KeyPair;
use serde_json::{Map, Value};
use std::future::Future;
use std::time::Duration;

use crate::device::{Assignment, Device, ETag, Enrollment, RegistrationId, Twin};
use crate::error::RegistryError;

/// Enrollment store and hub assignment broker.
#[async_trait]
pub trait ProvisioningRegistry: Send + Sync {
    /// Fetch an enrollment. `Ok(None)` when none exists.
    async fn lookup(&self, id: &RegistrationId) -> Result<Option<Enrollment>, RegistryError>;

    /// Create the enrollment, or replace the existing one with the same id.
    async fn create_or_update(&self, enrollment: Enrollment) -> Result<Enrollment, RegistryError>;

    /// Read back the key pair persisted for an enrollment.
    async fn get_attestation(&self, id: &RegistrationId) -> Result<KeyPair, RegistryError>;
}

/// Hub-side device identity and twin store.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Bind a device to a hub using its enrollment keys. Creates the device
    /// record on first success.
    async fn assign(
        &self,
        id: &RegistrationId,
        keys: &KeyPair,
    ) -> Result<Assignment, RegistryError>;

    async fn get_device(&self, id: &RegistrationId) -> Result<Device, RegistryError>;

    /// Conditional write; fails with [`RegistryError::Conflict`] when
    /// `device.etag` is stale.
    async fn update_device(&self, device: Device) -> Result<Device, RegistryError>;

    async fn get_twin(&self, id: &RegistrationId) -> Result<Twin, RegistryError>;

    /// Merge `patch` into the twin's desired properties if `etag` is current.
    async fn update_twin(
        &self,
        id: &RegistrationId,
        patch: &Map<String, Value>,
        etag: &ETag,
    ) -> Result<Twin, RegistryError>;
}

/// Run a registry call under a deadline. Expiry maps to
/// [`RegistryError::Timeout`].
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, RegistryError>
where
    F: Future<Output = Result<T, RegistryError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RegistryError::Timeout(timeout)),
    }
}
