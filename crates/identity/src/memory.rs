//! In-memory registries for local development and tests.
//!
//! Both registries behave like their remote counterparts: the device
//! registry only assigns devices whose keys match the enrollment's
//! attestation, records the assignment back on the enrollment, and enforces
//! eTags on every conditional write. A [`FaultInjector`] on each registry
//! lets callers script failures per operation.

use async_trait::async_trait;
use iotprov_crypto::KeyPair;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;

use crate::device::{Assignment, Device, ETag, Enrollment, RegistrationId, Twin};
use crate::error::RegistryError;
use crate::registry::{DeviceRegistry, ProvisioningRegistry};
use crate::twin::merge_desired;

/// Registry operation a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Lookup,
    CreateOrUpdate,
    GetAttestation,
    Assign,
    GetDevice,
    UpdateDevice,
    GetTwin,
    UpdateTwin,
}

/// Scripted misbehaviour for one call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail before touching state
    Fail(RegistryError),
    /// Apply the write, then report failure (lost response)
    FailAfterCommit(RegistryError),
    /// Never respond
    Hang,
}

/// Per-operation fault queues and call counters.
#[derive(Debug, Default)]
pub struct FaultInjector {
    queued: Mutex<HashMap<Operation, VecDeque<Fault>>>,
    calls: Mutex<HashMap<Operation, usize>>,
}

impl FaultInjector {
    /// Apply `fault` to the next call of `op`.
    pub fn inject(&self, op: Operation, fault: Fault) {
        self.inject_times(op, fault, 1);
    }

    /// Apply `fault` to each of the next `times` calls of `op`.
    pub fn inject_times(&self, op: Operation, fault: Fault, times: usize) {
        let mut queued = self.queued.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = queued.entry(op).or_default();
        queue.extend(std::iter::repeat(fault).take(times));
    }

    /// Drop every pending fault.
    pub fn clear(&self) {
        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// How many times `op` has been invoked.
    pub fn call_count(&self, op: Operation) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    fn take(&self, op: Operation) -> Option<Fault> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_default() += 1;

        self.queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
    }

    /// Gate a call. `Err` aborts before any state change; `Ok(Some)` must be
    /// returned after the write is applied.
    async fn gate(&self, op: Operation) -> Result<Option<RegistryError>, RegistryError> {
        match self.take(op) {
            None => Ok(None),
            Some(Fault::Fail(err)) => Err(err),
            Some(Fault::FailAfterCommit(err)) => Ok(Some(err)),
            Some(Fault::Hang) => std::future::pending().await,
        }
    }
}

fn finish<T>(value: T, after_commit: Option<RegistryError>) -> Result<T, RegistryError> {
    match after_commit {
        Some(err) => Err(err),
        None => Ok(value),
    }
}

/// Provisioning registry backed by a map of enrollments.
#[derive(Debug, Default)]
pub struct InMemoryProvisioningRegistry {
    enrollments: RwLock<HashMap<RegistrationId, Enrollment>>,
    faults: FaultInjector,
}

impl InMemoryProvisioningRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Stored enrollment, bypassing fault injection.
    pub async fn enrollment(&self, id: &RegistrationId) -> Option<Enrollment> {
        self.enrollments.read().await.get(id).cloned()
    }

    /// Stored attestation, bypassing fault injection.
    pub async fn stored_keys(&self, id: &RegistrationId) -> Option<KeyPair> {
        self.enrollment(id).await.map(|e| e.keys)
    }

    pub async fn len(&self) -> usize {
        self.enrollments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Record the hub a device was bound to.
    async fn mark_assigned(&self, id: &RegistrationId, hub: &str) -> Result<(), RegistryError> {
        let mut enrollments = self.enrollments.write().await;
        let enrollment = enrollments
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        enrollment.assigned_hub = Some(hub.to_string());
        Ok(())
    }
}

#[async_trait]
impl ProvisioningRegistry for InMemoryProvisioningRegistry {
    async fn lookup(&self, id: &RegistrationId) -> Result<Option<Enrollment>, RegistryError> {
        let after = self.faults.gate(Operation::Lookup).await?;
        finish(self.enrollments.read().await.get(id).cloned(), after)
    }

    async fn create_or_update(&self, enrollment: Enrollment) -> Result<Enrollment, RegistryError> {
        let after_commit = self.faults.gate(Operation::CreateOrUpdate).await?;
        self.enrollments
            .write()
            .await
            .insert(enrollment.registration_id.clone(), enrollment.clone());
        finish(enrollment, after_commit)
    }

    async fn get_attestation(&self, id: &RegistrationId) -> Result<KeyPair, RegistryError> {
        let after = self.faults.gate(Operation::GetAttestation).await?;
        let keys = self
            .enrollments
            .read()
            .await
            .get(id)
            .map(|e| e.keys.clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        finish(keys, after)
    }
}

#[derive(Debug, Default)]
struct HubState {
    devices: HashMap<RegistrationId, Device>,
    twins: HashMap<RegistrationId, Twin>,
}

/// Single hub that assigns devices enrolled in a linked provisioning registry.
#[derive(Debug)]
pub struct InMemoryDeviceRegistry {
    hub_name: String,
    provisioning: Arc<InMemoryProvisioningRegistry>,
    state: RwLock<HubState>,
    etag_counter: AtomicU64,
    faults: FaultInjector,
}

impl InMemoryDeviceRegistry {
    pub fn new(
        hub_name: impl Into<String>,
        provisioning: Arc<InMemoryProvisioningRegistry>,
    ) -> Self {
        Self {
            hub_name: hub_name.into(),
            provisioning,
            state: RwLock::new(HubState::default()),
            etag_counter: AtomicU64::new(0),
            faults: FaultInjector::default(),
        }
    }

    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Stored device keys, bypassing fault injection.
    pub async fn device_keys(&self, id: &RegistrationId) -> Option<KeyPair> {
        self.state
            .read()
            .await
            .devices
            .get(id)
            .map(|d| d.keys.clone())
    }

    /// Stored twin, bypassing fault injection.
    pub async fn twin(&self, id: &RegistrationId) -> Option<Twin> {
        self.state.read().await.twins.get(id).cloned()
    }

    /// Simulate another writer touching the device record.
    pub async fn touch_device(&self, id: &RegistrationId) -> Option<ETag> {
        let etag = self.next_etag();
        let mut state = self.state.write().await;
        let device = state.devices.get_mut(id)?;
        device.etag = etag.clone();
        Some(etag)
    }

    /// Simulate another writer touching the twin.
    pub async fn touch_twin(&self, id: &RegistrationId) -> Option<ETag> {
        let etag = self.next_etag();
        let mut state = self.state.write().await;
        let twin = state.twins.get_mut(id)?;
        twin.etag = etag.clone();
        Some(etag)
    }

    fn next_etag(&self) -> ETag {
        let n = self.etag_counter.fetch_add(1, Ordering::Relaxed) + 1;
        ETag(format!("\"{n:08x}\""))
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn assign(
        &self,
        id: &RegistrationId,
        keys: &KeyPair,
    ) -> Result<Assignment, RegistryError> {
        let after_commit = self.faults.gate(Operation::Assign).await?;

        let enrollment = self
            .provisioning
            .enrollment(id)
            .await
            .ok_or_else(|| RegistryError::Rejected(format!("no enrollment for {id}")))?;
        if enrollment.keys != *keys {
            return Err(RegistryError::Rejected(format!(
                "symmetric key attestation mismatch for {id}"
            )));
        }

        {
            let device_etag = self.next_etag();
            let twin_etag = self.next_etag();
            let mut state = self.state.write().await;
            state.devices.insert(
                id.clone(),
                Device {
                    device_id: id.clone(),
                    etag: device_etag,
                    keys: keys.clone(),
                },
            );
            state.twins.entry(id.clone()).or_insert_with(|| Twin {
                device_id: id.clone(),
                etag: twin_etag,
                desired: Map::new(),
            });
        }
        self.provisioning.mark_assigned(id, &self.hub_name).await?;

        finish(
            Assignment {
                assigned_hub: self.hub_name.clone(),
                device_id: id.clone(),
            },
            after_commit,
        )
    }

    async fn get_device(&self, id: &RegistrationId) -> Result<Device, RegistryError> {
        let after = self.faults.gate(Operation::GetDevice).await?;
        let device = self
            .state
            .read()
            .await
            .devices
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        finish(device, after)
    }

    async fn update_device(&self, device: Device) -> Result<Device, RegistryError> {
        let after_commit = self.faults.gate(Operation::UpdateDevice).await?;

        let etag = self.next_etag();
        let mut state = self.state.write().await;
        let current = state
            .devices
            .get_mut(&device.device_id)
            .ok_or_else(|| RegistryError::NotFound(device.device_id.to_string()))?;
        if current.etag != device.etag {
            return Err(RegistryError::Conflict(format!(
                "device {} has eTag {}, got {}",
                device.device_id, current.etag, device.etag
            )));
        }

        current.keys = device.keys;
        current.etag = etag;
        finish(current.clone(), after_commit)
    }

    async fn get_twin(&self, id: &RegistrationId) -> Result<Twin, RegistryError> {
        let after = self.faults.gate(Operation::GetTwin).await?;
        let twin = self
            .state
            .read()
            .await
            .twins
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        finish(twin, after)
    }

    async fn update_twin(
        &self,
        id: &RegistrationId,
        patch: &Map<String, Value>,
        etag: &ETag,
    ) -> Result<Twin, RegistryError> {
        let after_commit = self.faults.gate(Operation::UpdateTwin).await?;

        let next = self.next_etag();
        let mut state = self.state.write().await;
        let twin = state
            .twins
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if twin.etag != *etag {
            return Err(RegistryError::Conflict(format!(
                "twin {} has eTag {}, got {}",
                id, twin.etag, etag
            )));
        }

        merge_desired(&mut twin.desired, patch);
        twin.etag = next;
        finish(twin.clone(), after_commit)
    }
}
