//! Idempotent device enrollment.
//!
//! Enrolling a device touches two registries that fail independently:
//!
//! 1. Look up the enrollment in the provisioning registry
//! 2. Absent: mint a key pair and create the enrollment.
//!    Present: read back its persisted attestation and reuse it
//! 3. Not yet bound to a hub: assign the device using those keys
//! 4. Already bound: confirm the hub holds the same keys
//! 5. Return connection descriptors for both keys
//!
//! If step 3 fails the enrollment stays "exists, unassigned". The next call
//! lands in the "present" branch of step 2, so the keys handed to the hub
//! are always the ones the provisioning registry holds. Keys are minted only
//! when the registry has confirmed that no enrollment exists.

use iotprov_core::ProvisioningConfig;
use iotprov_crypto::KeyPair;
use std::sync::Arc;

use crate::device::{EnrollOutcome, Enrollment, EnrollmentResult, RegistrationId};
use crate::error::{ProvisioningError, ProvisioningResult, RegistryKind};
use crate::locks::RegistrationLocks;
use crate::registry::{with_timeout, DeviceRegistry, ProvisioningRegistry};

/// Drives enrollment of new device identities.
pub struct EnrollmentOrchestrator {
    config: ProvisioningConfig,
    provisioning: Arc<dyn ProvisioningRegistry>,
    devices: Arc<dyn DeviceRegistry>,
    locks: RegistrationLocks,
}

impl EnrollmentOrchestrator {
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

    /// Enroll `registration_id`, resuming any earlier partial attempt.
    ///
    /// # Errors
    ///
    /// - `FatalConfiguration` for a malformed id
    /// - `TransientRegistry` / `Rejected` when the provisioning registry fails
    /// - `PartialEnrollment` when the enrollment exists but hub assignment failed
    /// - `RegistriesOutOfSync` when the device is assigned but the hub holds
    ///   different keys; run `repair`
    pub async fn enroll(&self, registration_id: &str) -> ProvisioningResult<EnrollmentResult> {
        let id = RegistrationId::parse(registration_id)?;
        let _guard = self.locks.acquire(&id).await;

        let (enrollment, created) = self.load_or_create(&id).await?;

        if let Some(hub) = enrollment.assigned_hub() {
            self.check_device_keys(&id, &enrollment.keys).await?;
            tracing::info!(registration_id = %id, hub, "Device already enrolled");
            return Ok(EnrollmentResult::new(
                hub,
                &id,
                &enrollment.keys,
                EnrollOutcome::AlreadyEnrolled,
            ));
        }

        let assignment = with_timeout(
            self.config.call_timeout(),
            self.devices.assign(&id, &enrollment.keys),
        )
        .await
        .map_err(|source| {
            tracing::warn!(
                registration_id = %id,
                error = %source,
                "Hub assignment failed; enrollment left unassigned"
            );
            ProvisioningError::PartialEnrollment {
                registration_id: id.to_string(),
                retryable: source.is_transient(),
                source,
            }
        })?;

        if assignment.device_id != id {
            tracing::warn!(
                registration_id = %id,
                device_id = %assignment.device_id,
                "Hub reported a different device id"
            );
        }

        let outcome = if created {
            EnrollOutcome::Enrolled
        } else {
            EnrollOutcome::Resumed
        };
        tracing::info!(
            registration_id = %id,
            hub = %assignment.assigned_hub,
            ?outcome,
            "Device enrolled"
        );

        Ok(EnrollmentResult::new(
            &assignment.assigned_hub,
            &id,
            &enrollment.keys,
            outcome,
        ))
    }

    /// Fetch the committed enrollment with its persisted keys, creating it if
    /// the registry confirms there is none. Returns whether it was created.
    /// Confirm the hub holds the attestation keys of an assigned device.
    async fn check_device_keys(
        &self,
        id: &RegistrationId,
        keys: &KeyPair,
    ) -> ProvisioningResult<()> {
        let device = with_timeout(self.config.call_timeout(), self.devices.get_device(id))
            .await
            .map_err(|e| ProvisioningError::from_registry(RegistryKind::Device, id.as_str(), e))?;

        if device.keys != *keys {
            tracing::warn!(
                registration_id = %id,
                "Device registry keys differ from attestation; repair required"
            );
            return Err(ProvisioningError::RegistriesOutOfSync {
                registration_id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn load_or_create(&self, id: &RegistrationId) -> ProvisioningResult<(Enrollment, bool)> {
        let timeout = self.config.call_timeout();
        let classify =
            |e| ProvisioningError::from_registry(RegistryKind::Provisioning, id.as_str(), e);

        let existing = with_timeout(timeout, self.provisioning.lookup(id))
            .await
            .map_err(classify)?;

        match existing {
            Some(enrollment) => {
                let keys = with_timeout(timeout, self.provisioning.get_attestation(id))
                    .await
                    .map_err(classify)?;
                tracing::debug!(registration_id = %id, "Reusing persisted attestation");
                Ok((Enrollment { keys, ..enrollment }, false))
            }
            None => {
                tracing::debug!(registration_id = %id, "No enrollment found; creating");
                let enrollment = Enrollment::new(
                    id.clone(),
                    KeyPair::generate(),
                    self.config.iot_hub_host_name.clone(),
                );
                let stored = with_timeout(timeout, self.provisioning.create_or_update(enrollment))
                    .await
                    .map_err(classify)?;
                tracing::info!(registration_id = %id, "Enrollment created");
                Ok((stored, true))
            }
        }
    }
}
