//! Test utilities for cross-crate integration tests

use async_trait::async_trait;
use iotprov_core::ProvisioningConfig;
use iotprov_crypto::KeyPair;
use iotprov_identity::{
    Assignment, Device, DeviceRegistry, ETag, Enrollment, InMemoryDeviceRegistry,
    InMemoryProvisioningRegistry, ProvisioningRegistry, ProvisioningService, RegistrationId,
    RegistryError, Twin,
};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// Hub host name used by the in-memory device registry.
pub const TEST_HUB: &str = "connect-iothub-dev.azure-devices.net";

/// Shared, ordered record of registry calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<&'static str>>>,
}

impl CallLog {
    pub fn record(&self, call: &'static str) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(call);
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    /// Position of the first occurrence of `call`.
    pub fn position(&self, call: &str) -> Option<usize> {
        self.entries().iter().position(|c| *c == call)
    }
}

/// Provisioning registry that logs each call before delegating.
pub struct RecordingProvisioning {
    pub inner: Arc<InMemoryProvisioningRegistry>,
    pub log: CallLog,
}

#[async_trait]
impl ProvisioningRegistry for RecordingProvisioning {
    async fn lookup(&self, id: &RegistrationId) -> Result<Option<Enrollment>, RegistryError> {
        self.log.record("provisioning.lookup");
        self.inner.lookup(id).await
    }

    async fn create_or_update(&self, enrollment: Enrollment) -> Result<Enrollment, RegistryError> {
        self.log.record("provisioning.create_or_update");
        self.inner.create_or_update(enrollment).await
    }

    async fn get_attestation(&self, id: &RegistrationId) -> Result<KeyPair, RegistryError> {
        self.log.record("provisioning.get_attestation");
        self.inner.get_attestation(id).await
    }
}

/// Device registry that logs each call before delegating.
pub struct RecordingDevices {
    pub inner: Arc<InMemoryDeviceRegistry>,
    pub log: CallLog,
}

#[async_trait]
impl DeviceRegistry for RecordingDevices {
    async fn assign(
        &self,
        id: &RegistrationId,
        keys: &KeyPair,
    ) -> Result<Assignment, RegistryError> {
        self.log.record("device.assign");
        self.inner.assign(id, keys).await
    }

    async fn get_device(&self, id: &RegistrationId) -> Result<Device, RegistryError> {
        self.log.record("device.get_device");
        self.inner.get_device(id).await
    }

    async fn update_device(&self, device: Device) -> Result<Device, RegistryError> {
        self.log.record("device.update_device");
        self.inner.update_device(device).await
    }

    async fn get_twin(&self, id: &RegistrationId) -> Result<Twin, RegistryError> {
        self.log.record("device.get_twin");
        self.inner.get_twin(id).await
    }

    async fn update_twin(
        &self,
        id: &RegistrationId,
        patch: &Map<String, Value>,
        etag: &ETag,
    ) -> Result<Twin, RegistryError> {
        self.log.record("device.update_twin");
        self.inner.update_twin(id, patch, etag).await
    }
}

/// Test fixture: linked in-memory registries plus a service over them.
pub struct TestBed {
    pub provisioning: Arc<InMemoryProvisioningRegistry>,
    pub hub: Arc<InMemoryDeviceRegistry>,
    pub log: CallLog,
    pub service: ProvisioningService,
}

impl TestBed {
    /// Build a test bed with the default development configuration.
    pub fn new() -> Self {
        Self::with_config(ProvisioningConfig::default_config())
    }

    /// Build a test bed with `config`. Panics if the config is rejected.
    pub fn with_config(config: ProvisioningConfig) -> Self {
        iotprov_core::logging::init_for_tests();

        let provisioning = Arc::new(InMemoryProvisioningRegistry::new());
        let hub = Arc::new(InMemoryDeviceRegistry::new(TEST_HUB, Arc::clone(&provisioning)));
        let log = CallLog::default();

        let service = ProvisioningService::new(
            config,
            Arc::new(RecordingProvisioning {
                inner: Arc::clone(&provisioning),
                log: log.clone(),
            }),
            Arc::new(RecordingDevices {
                inner: Arc::clone(&hub),
                log: log.clone(),
            }),
        )
        .expect("Failed to build provisioning service");

        Self {
            provisioning,
            hub,
            log,
            service,
        }
    }

    /// Keys held by each registry for `raw`.
    pub async fn keys(&self, raw: &str) -> (Option<KeyPair>, Option<KeyPair>) {
        let id = registration_id(raw);
        (
            self.provisioning.stored_keys(&id).await,
            self.hub.device_keys(&id).await,
        )
    }

    /// Assert both registries hold the same, present key pair.
    pub async fn assert_consistent(&self, raw: &str) {
        let (provisioning, device) = self.keys(raw).await;
        assert!(provisioning.is_some(), "no enrollment for {raw}");
        assert_eq!(provisioning, device, "registries disagree for {raw}");
    }
}

impl Default for TestBed {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a registration id known to be valid.
pub fn registration_id(raw: &str) -> RegistrationId {
    RegistrationId::parse(raw).expect("valid registration id")
}
