//! Key rotation for enrolled devices.
//!
//! The provisioning registry is written first, the device registry second.
//! The two writes are not atomic: when the second one fails the identity is
//! reported as [`ProvisioningError::PartialRotation`] and the fix is
//! [`KeyRotationOrchestrator::repair`], which re-pushes the provisioning
//! registry's keys to the hub without minting new ones.

use iotprov_core::ProvisioningConfig;
use iotprov_crypto::KeyPair;
use std::sync::Arc;

use crate::device::{Device, RegistrationId};
use crate::error::{ProvisioningError, ProvisioningResult, RegistryError, RegistryKind};
use crate::locks::RegistrationLocks;
use crate::registry::{with_timeout, DeviceRegistry, ProvisioningRegistry};

/// Rotates and repairs device credentials across both registries.
pub struct KeyRotationOrchestrator {
    config: ProvisioningConfig,
    provisioning: Arc<dyn ProvisioningRegistry>,
    devices: Arc<dyn DeviceRegistry>,
    locks: RegistrationLocks,
}

impl KeyRotationOrchestrator {
    /// Create an orchestrator with its own lock table.
    pub fn new(
        config: ProvisioningConfig,
        provisioning: Arc<dyn ProvisioningRegistry>,
        devices: Arc<dyn DeviceRegistry>,
    ) -> Self {
        Self::with_locks(config, provisioning, devices, RegistrationLocks::new())
    }

    /// Create an orchestrator sharing `locks` with other orchestrators.
    pub fn with_locks(
        config: ProvisioningConfig,
        provisioning: Arc<dyn ProvisioningRegistry>,
        devices: Arc<dyn DeviceRegistry>,
        locks: RegistrationLocks,
    ) -> Self {
        Self {
            config,
            provisioning,
            devices,
            locks,
        }
    }

    /// Replace the keys of a fully enrolled device in both registries.
    ///
    /// Returns the new pair only when both writes succeeded.
    ///
    /// # Errors
    ///
    /// - `NotEnrolled` if there is no enrollment or it has no assigned hub
    /// - `TransientRegistry` / `Rejected` if the provisioning write fails
    ///   (device registry untouched)
    /// - `PartialRotation` if the provisioning write succeeded and the
    ///   device registry write did not
    pub async fn rotate(&self, registration_id: &str) -> ProvisioningResult<KeyPair> {
        let id = RegistrationId::parse(registration_id)?;
        let _guard = self.locks.acquire(&id).await;
        let timeout = self.config.call_timeout();
        let classify =
            |e| ProvisioningError::from_registry(RegistryKind::Provisioning, id.as_str(), e);

        let mut enrollment = with_timeout(timeout, self.provisioning.lookup(&id))
            .await
            .map_err(classify)?
            .ok_or_else(|| ProvisioningError::NotEnrolled {
                registration_id: id.to_string(),
            })?;
        if enrollment.assigned_hub().is_none() {
            return Err(ProvisioningError::NotEnrolled {
                registration_id: id.to_string(),
            });
        }

        let keys = KeyPair::generate();
        enrollment.keys = keys.clone();
        with_timeout(timeout, self.provisioning.create_or_update(enrollment))
            .await
            .map_err(classify)?;
        tracing::info!(registration_id = %id, "Provisioning registry keys rotated");

        self.push_keys(&id, &keys).await.map_err(|source| {
            tracing::warn!(
                registration_id = %id,
                error = %source,
                "Device registry update failed; registries out of sync until repaired"
            );
            ProvisioningError::PartialRotation {
                registration_id: id.to_string(),
                source,
            }
        })?;

        tracing::info!(registration_id = %id, "Key rotation complete");
        Ok(keys)
    }

    /// Copy the provisioning registry's current keys to the device registry.
    ///
    /// Never mints keys. A no-op when the registries already agree.
    pub async fn repair(&self, registration_id: &str) -> ProvisioningResult<KeyPair> {
        let id = RegistrationId::parse(registration_id)?;
        let _guard = self.locks.acquire(&id).await;

        let keys = with_timeout(
            self.config.call_timeout(),
            self.provisioning.get_attestation(&id),
        )
        .await
        .map_err(|e| match e {
            RegistryError::NotFound(_) => ProvisioningError::NotEnrolled {
                registration_id: id.to_string(),
            },
            other => {
                ProvisioningError::from_registry(RegistryKind::Provisioning, id.as_str(), other)
            }
        })?;

        self.push_keys(&id, &keys).await.map_err(|e| match e {
            RegistryError::Conflict(_) => ProvisioningError::Conflict {
                registration_id: id.to_string(),
                attempts: self.config.max_conflict_retries + 1,
            },
            other => ProvisioningError::from_registry(RegistryKind::Device, id.as_str(), other),
        })?;

        tracing::info!(registration_id = %id, "Device registry keys repaired");
        Ok(keys)
    }

    /// Conditional device update with bounded re-read-and-retry on eTag
    /// conflicts.
    async fn push_keys(
        &self,
        id: &RegistrationId,
        keys: &KeyPair,
    ) -> Result<Device, RegistryError> {
        let timeout = self.config.call_timeout();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let current = with_timeout(timeout, self.devices.get_device(id)).await?;
            if current.keys == *keys {
                return Ok(current);
            }

            let update = Device {
                device_id: current.device_id.clone(),
                etag: current.etag.clone(),
                keys: keys.clone(),
            };
            match with_timeout(timeout, self.devices.update_device(update)).await {
                Ok(device) => return Ok(device),
                Err(RegistryError::Conflict(reason))
                    if attempt <= self.config.max_conflict_retries =>
                {
                    tracing::debug!(
                        registration_id = %id,
                        attempt,
                        %reason,
                        "eTag conflict; re-reading device"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
