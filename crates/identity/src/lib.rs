//! Device identity provisioning for the iotprov system.
//!
//! This crate enrolls devices with a provisioning registry, binds them to a
//! device registry (hub), and rotates their symmetric keys while keeping the
//! two registries in agreement.
//!
//! # Core Concepts
//!
//! - **Enrollment**: provisioning-registry record holding a device's key pair
//! - **Assignment**: binding an enrolled device to a hub, which creates the device record
//! - **Rotation**: replacing the key pair in both registries, provisioning first
//! - **Repair**: re-pushing the provisioning registry's keys after a partial rotation
//!
//! # Consistency Model
//!
//! Once a device is enrolled, both registries hold the same key pair. Keys
//! are only minted when the provisioning registry confirms no enrollment
//! exists; every retry reads the persisted attestation back. Orchestration
//! calls for one registration id are serialized by [`RegistrationLocks`].
//! Every remote call runs under the configured timeout.

pub mod device;
pub mod enrollment;
pub mod error;
pub mod locks;
pub mod memory;
pub mod registry;
pub mod rotation;
pub mod service;
pub mod twin;

pub use device::{
    Assignment, ConnectionInfo, ConnectionInfoError, Device, ETag, EnrollOutcome, Enrollment,
    EnrollmentResult, RegistrationId, Twin, MAX_REGISTRATION_ID_LEN,
};
pub use enrollment::EnrollmentOrchestrator;
pub use error::{ProvisioningError, ProvisioningResult, RegistryError, RegistryKind};
pub use locks::{RegistrationGuard, RegistrationLocks};
pub use memory::{
    Fault, FaultInjector, InMemoryDeviceRegistry, InMemoryProvisioningRegistry, Operation,
};
pub use registry::{with_timeout, DeviceRegistry, ProvisioningRegistry};
pub use rotation::KeyRotationOrchestrator;
pub use service::ProvisioningService;
pub use twin::{merge_desired, TwinUpdater};

// Re-export for convenience
pub use iotprov_core::ProvisioningConfig;
pub use iotprov_crypto::KeyPair;
