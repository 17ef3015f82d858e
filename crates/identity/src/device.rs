//! Device identity records shared by both registries.
//!
//! A [`RegistrationId`] names one physical device in the provisioning
//! registry and, as the device id, in the hub.

use iotprov_crypto::KeyPair;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{ProvisioningError, ProvisioningResult};

/// Maximum registration id length accepted by the registries.
pub const MAX_REGISTRATION_ID_LEN: usize = 128;

/// Stable, caller-supplied identifier of one physical device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegistrationId(String);

impl RegistrationId {
    /// Validate and wrap a registration id.
    ///
    /// Accepts ASCII alphanumerics plus `-`, `.`, `_` and `:`, up to
    /// [`MAX_REGISTRATION_ID_LEN`] characters.
    pub fn parse(raw: impl Into<String>) -> ProvisioningResult<Self> {
        let raw = raw.into();

        if raw.is_empty() {
            return Err(ProvisioningError::FatalConfiguration(
                "registration id cannot be empty".to_string(),
            ));
        }
        if raw.len() > MAX_REGISTRATION_ID_LEN {
            return Err(ProvisioningError::FatalConfiguration(format!(
                "registration id exceeds {} characters",
                MAX_REGISTRATION_ID_LEN
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | ':')))
        {
            return Err(ProvisioningError::FatalConfiguration(format!(
                "registration id {:?} contains invalid character {:?}",
                raw, bad
            )));
        }

        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RegistrationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RegistrationId {
    type Error = ProvisioningError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}

impl From<RegistrationId> for String {
    fn from(id: RegistrationId) -> Self {
        id.0
    }
}

/// Opaque optimistic-concurrency token; changes on every write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(pub String);

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Enrollment record held by the provisioning registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    /// Device this enrollment belongs to
    pub registration_id: RegistrationId,
    /// Symmetric key attestation
    pub keys: KeyPair,
    /// Hub the device was bound to; `None` until assignment succeeds
    pub assigned_hub: Option<String>,
    /// Hub host name the enrollment targets
    pub iot_hub_host_name: Option<String>,
}

impl Enrollment {
    /// New, unassigned enrollment.
    pub fn new(
        registration_id: RegistrationId,
        keys: KeyPair,
        iot_hub_host_name: Option<String>,
    ) -> Self {
        Self {
            registration_id,
            keys,
            assigned_hub: None,
            iot_hub_host_name,
        }
    }

    /// Assigned hub, ignoring blank values.
    pub fn assigned_hub(&self) -> Option<&str> {
        self.assigned_hub
            .as_deref()
            .filter(|hub| !hub.trim().is_empty())
    }
}

/// Device record held by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Equal to the registration id
    pub device_id: RegistrationId,
    pub etag: ETag,
    pub keys: KeyPair,
}

/// Desired-configuration document attached to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Twin {
    pub device_id: RegistrationId,
    pub etag: ETag,
    pub desired: Map<String, Value>,
}

/// Result of binding a device to a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub assigned_hub: String,
    pub device_id: RegistrationId,
}

/// Errors parsing a connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionInfoError {
    #[error("Malformed segment: {0}")]
    MalformedSegment(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid device id: {0}")]
    InvalidDeviceId(String),
}

/// Device connection descriptor:
/// `HostName=<hub>;DeviceId=<id>;SharedAccessKey=<key>`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub host_name: String,
    pub device_id: RegistrationId,
    pub shared_access_key: String,
}

impl ConnectionInfo {
    pub fn new(host_name: &str, device_id: &RegistrationId, shared_access_key: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            device_id: device_id.clone(),
            shared_access_key: shared_access_key.to_string(),
        }
    }

    /// Primary and secondary descriptors for a key pair.
    pub fn for_keys(
        host_name: &str,
        device_id: &RegistrationId,
        keys: &KeyPair,
    ) -> (ConnectionInfo, ConnectionInfo) {
        (
            Self::new(host_name, device_id, keys.primary()),
            Self::new(host_name, device_id, keys.secondary()),
        )
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HostName={};DeviceId={};SharedAccessKey={}",
            self.host_name, self.device_id, self.shared_access_key
        )
    }
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("host_name", &self.host_name)
            .field("device_id", &self.device_id)
            .field("shared_access_key", &"<redacted>")
            .finish()
    }
}

impl FromStr for ConnectionInfo {
    type Err = ConnectionInfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;

        for segment in s.split(';').filter(|seg| !seg.is_empty()) {
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionInfoError::MalformedSegment(segment.to_string()))?;
            match name {
                "HostName" => host_name = Some(value.to_string()),
                "DeviceId" => device_id = Some(value.to_string()),
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                _ => {}
            }
        }

        let device_id = device_id.ok_or(ConnectionInfoError::MissingField("DeviceId"))?;
        Ok(Self {
            host_name: host_name.ok_or(ConnectionInfoError::MissingField("HostName"))?,
            device_id: RegistrationId::parse(device_id.clone())
                .map_err(|_| ConnectionInfoError::InvalidDeviceId(device_id))?,
            shared_access_key: shared_access_key
                .ok_or(ConnectionInfoError::MissingField("SharedAccessKey"))?,
        })
    }
}

/// How an `enroll` call reached its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnrollOutcome {
    /// Enrollment created and assigned by this call
    Enrolled,
    /// Enrollment existed unassigned; this call finished the assignment
    Resumed,
    /// Enrollment was already assigned; descriptors rebuilt from the stored attestation
    AlreadyEnrolled,
}

/// Credentials handed back by a successful `enroll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentResult {
    pub primary_connection: ConnectionInfo,
    pub secondary_connection: ConnectionInfo,
    pub assigned_hub: String,
    pub outcome: EnrollOutcome,
}

impl EnrollmentResult {
    pub fn new(
        assigned_hub: &str,
        registration_id: &RegistrationId,
        keys: &KeyPair,
        outcome: EnrollOutcome,
    ) -> Self {
        let (primary_connection, secondary_connection) =
            ConnectionInfo::for_keys(assigned_hub, registration_id, keys);
        Self {
            primary_connection,
            secondary_connection,
            assigned_hub: assigned_hub.to_string(),
            outcome,
        }
    }
}
