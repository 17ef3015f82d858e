//! Provisioning service facade.
//!
//! Wires both orchestrators and the twin updater to one configuration, one
//! pair of registry clients and one shared lock table, so enrollment,
//! rotation and repair of the same device never overlap.

use iotprov_core::ProvisioningConfig;
use iotprov_crypto::KeyPair;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::device::{EnrollmentResult, Twin};
use crate::enrollment::EnrollmentOrchestrator;
use crate::error::ProvisioningResult;
use crate::locks::RegistrationLocks;
use crate::registry::{DeviceRegistry, ProvisioningRegistry};
use crate::rotation::KeyRotationOrchestrator;
use crate::twin::TwinUpdater;

pub struct ProvisioningService {
    enrollment: EnrollmentOrchestrator,
    rotation: KeyRotationOrchestrator,
    twins: TwinUpdater,
}

impl ProvisioningService {
    /// Validate `config` and build the service.
    pub fn new(
        config: ProvisioningConfig,
        provisioning: Arc<dyn ProvisioningRegistry>,
        devices: Arc<dyn DeviceRegistry>,
    ) -> ProvisioningResult<Self> {
        config.validate()?;

        let locks = RegistrationLocks::new();
        tracing::info!(
            id_scope = %config.id_scope,
            global_device_endpoint = %config.global_device_endpoint,
            "Provisioning service configured"
        );

        Ok(Self {
            enrollment: EnrollmentOrchestrator::with_locks(
                config.clone(),
                Arc::clone(&provisioning),
                Arc::clone(&devices),
                locks.clone(),
            ),
            rotation: KeyRotationOrchestrator::with_locks(
                config.clone(),
                provisioning,
                Arc::clone(&devices),
                locks,
            ),
            twins: TwinUpdater::new(config, devices),
        })
    }

    pub async fn enroll(&self, registration_id: &str) -> ProvisioningResult<EnrollmentResult> {
        self.enrollment.enroll(registration_id).await
    }

    pub async fn rotate(&self, registration_id: &str) -> ProvisioningResult<KeyPair> {
        self.rotation.rotate(registration_id).await
    }

    pub async fn repair(&self, registration_id: &str) -> ProvisioningResult<KeyPair> {
        self.rotation.repair(registration_id).await
    }

    pub async fn patch_desired(
        &self,
        device_id: &str,
        patch: &Map<String, Value>,
    ) -> ProvisioningResult<Twin> {
        self.twins.patch_desired(device_id, patch).await
    }
}
