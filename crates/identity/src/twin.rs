//! Twin desired-property updates.
//!
//! One conditional write: read the twin, send the patch with the eTag that
//! was read. A concurrent writer makes the write fail with a conflict, which
//! is reported as-is.

use iotprov_core::ProvisioningConfig;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::device::{RegistrationId, Twin};
use crate::error::{ProvisioningError, ProvisioningResult, RegistryKind};
use crate::registry::{with_timeout, DeviceRegistry};

/// Apply a JSON merge patch to a desired-properties document.
///
/// Objects merge recursively, `null` removes the key, anything else replaces.
pub fn merge_desired(target: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        match value {
            Value::Null => {
                target.remove(key);
            }
            Value::Object(nested) => {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(existing) = slot {
                    merge_desired(existing, nested);
                }
            }
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

/// Desired-property patcher over a device registry.
pub struct TwinUpdater {
    config: ProvisioningConfig,
    devices: Arc<dyn DeviceRegistry>,
}

impl TwinUpdater {
    pub fn new(config: ProvisioningConfig, devices: Arc<dyn DeviceRegistry>) -> Self {
        Self { config, devices }
    }

    /// Merge `patch` into the desired properties of `device_id`.
    ///
    /// Not retried: a conflict means someone else wrote the twin since it was
    /// read, and the caller decides what to do.
    pub async fn patch_desired(
        &self,
        device_id: &str,
        patch: &Map<String, Value>,
    ) -> ProvisioningResult<Twin> {
        let id = RegistrationId::parse(device_id)?;
        let timeout = self.config.call_timeout();

        let twin = with_timeout(timeout, self.devices.get_twin(&id))
            .await
            .map_err(|e| ProvisioningError::from_registry(RegistryKind::Device, id.as_str(), e))?;

        let updated = with_timeout(timeout, self.devices.update_twin(&id, patch, &twin.etag))
            .await
            .map_err(|e| {
                tracing::warn!(device_id = %id, error = %e, "Twin update failed");
                ProvisioningError::from_registry(RegistryKind::Device, id.as_str(), e)
            })?;

        tracing::info!(device_id = %id, etag = %updated.etag, "Twin desired properties updated");
        Ok(updated)
    }
}
