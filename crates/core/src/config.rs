//! Configuration management for iotprov.
//!
//! All connection parameters are carried by an explicit [`ProvisioningConfig`]
//! handed to the orchestrators at construction time.

use serde::{Deserialize, Serialize};
#[cfg(feature = "toml")]
use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

/// Default per-call timeout for remote registry operations (30 seconds).
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Default number of re-read-and-retry rounds after an eTag conflict.
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

const ENV_PREFIX: &str = "IOTPROV_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Connection string of the provisioning registry service
    pub provisioning_endpoint: String,
    /// Connection string of the device registry (hub)
    pub hub_connection: String,
    /// Global endpoint devices register against
    pub global_device_endpoint: String,
    /// Provisioning scope identifier
    pub id_scope: String,
    /// Hub host name new enrollments are targeted at
    #[serde(default)]
    pub iot_hub_host_name: Option<String>,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

fn default_max_conflict_retries() -> u32 {
    DEFAULT_MAX_CONFLICT_RETRIES
}

impl ProvisioningConfig {
    /// Load configuration from a TOML file.
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `IOTPROV_*` environment variables.
    ///
    /// Required: `IOTPROV_PROVISIONING_ENDPOINT`, `IOTPROV_HUB_CONNECTION`,
    /// `IOTPROV_GLOBAL_DEVICE_ENDPOINT`, `IOTPROV_ID_SCOPE`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let required = |name: &'static str, field: &'static str| {
            var(name).ok_or(Error::MissingConfig(field))
        };

        let call_timeout_ms = match var("CALL_TIMEOUT_MS") {
            Some(raw) => raw.parse().map_err(|e| Error::InvalidConfig {
                field: "call_timeout_ms",
                reason: format!("{e}"),
            })?,
            None => DEFAULT_CALL_TIMEOUT_MS,
        };
        let max_conflict_retries = match var("MAX_CONFLICT_RETRIES") {
            Some(raw) => raw.parse().map_err(|e| Error::InvalidConfig {
                field: "max_conflict_retries",
                reason: format!("{e}"),
            })?,
            None => DEFAULT_MAX_CONFLICT_RETRIES,
        };

        let config = Self {
            provisioning_endpoint: required("PROVISIONING_ENDPOINT", "provisioning_endpoint")?,
            hub_connection: required("HUB_CONNECTION", "hub_connection")?,
            global_device_endpoint: required("GLOBAL_DEVICE_ENDPOINT", "global_device_endpoint")?,
            id_scope: required("ID_SCOPE", "id_scope")?,
            iot_hub_host_name: var("IOT_HUB_HOST_NAME").filter(|v| !v.trim().is_empty()),
            call_timeout_ms,
            max_conflict_retries,
        };
        config.validate()?;
        Ok(config)
    }

    /// Local development configuration pointing at placeholder endpoints.
    pub fn default_config() -> Self {
        Self {
            provisioning_endpoint: "HostName=localhost;SharedAccessKeyName=provisioningserviceowner"
                .to_string(),
            hub_connection: "HostName=localhost;SharedAccessKeyName=iothubowner".to_string(),
            global_device_endpoint: "localhost".to_string(),
            id_scope: "0ne00000000".to_string(),
            iot_hub_host_name: Some("localhost.azure-devices.net".to_string()),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    /// Check that every required field is present and usable.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("provisioning_endpoint", &self.provisioning_endpoint),
            ("hub_connection", &self.hub_connection),
            ("global_device_endpoint", &self.global_device_endpoint),
            ("id_scope", &self.id_scope),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::MissingConfig(field));
            }
        }

        if self.call_timeout_ms == 0 {
            return Err(Error::InvalidConfig {
                field: "call_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Per-call timeout applied to every remote registry operation.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self::default_config()
    }
}
