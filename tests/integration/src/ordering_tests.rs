//! Registry call ordering for each operation.

use crate::test_utils::*;
use iotprov_identity::{Fault, Operation, ProvisioningError, RegistryError};
use serde_json::json;

#[tokio::test]
async fn test_enroll_new_device_calls() {
    let bed = TestBed::new();

    bed.service.enroll("dev-1").await.unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "provisioning.lookup",
            "provisioning.create_or_update",
            "device.assign",
        ]
    );
}

#[tokio::test]
async fn test_resumed_enroll_reads_attestation_and_never_writes_enrollment() {
    let bed = TestBed::new();
    bed.hub.faults().inject(
        Operation::Assign,
        Fault::Fail(RegistryError::Unavailable("hub unavailable".to_string())),
    );
    bed.service.enroll("dev-1").await.unwrap_err();
    bed.log.clear();

    bed.service.enroll("dev-1").await.unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "provisioning.lookup",
            "provisioning.get_attestation",
            "device.assign",
        ]
    );
}

#[tokio::test]
async fn test_enrolled_device_checks_hub_keys_instead_of_assigning() {
    let bed = TestBed::new();
    bed.service.enroll("dev-1").await.unwrap();
    bed.log.clear();

    bed.service.enroll("dev-1").await.unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "provisioning.lookup",
            "provisioning.get_attestation",
            "device.get_device",
        ]
    );
}

#[tokio::test]
async fn test_rotate_writes_provisioning_before_device() {
    let bed = TestBed::new();
    bed.service.enroll("dev-1").await.unwrap();
    bed.log.clear();

    bed.service.rotate("dev-1").await.unwrap();

    let provisioning_write = bed.log.position("provisioning.create_or_update").unwrap();
    let device_write = bed.log.position("device.update_device").unwrap();
    assert!(provisioning_write < device_write);
    assert_eq!(
        bed.log.entries(),
        vec![
            "provisioning.lookup",
            "provisioning.create_or_update",
            "device.get_device",
            "device.update_device",
        ]
    );
}

#[tokio::test]
async fn test_failed_provisioning_write_leaves_device_untouched() {
    let bed = TestBed::new();
    bed.service.enroll("dev-1").await.unwrap();
    bed.log.clear();
    bed.provisioning.faults().inject(
        Operation::CreateOrUpdate,
        Fault::Fail(RegistryError::Unavailable("throttled".to_string())),
    );

    let err = bed.service.rotate("dev-1").await.unwrap_err();

    assert!(matches!(err, ProvisioningError::TransientRegistry { .. }));
    assert!(bed.log.entries().iter().all(|c| !c.starts_with("device.")));
    bed.assert_consistent("dev-1").await;
}

#[tokio::test]
async fn test_repair_never_writes_provisioning() {
    let bed = TestBed::new();
    bed.service.enroll("dev-1").await.unwrap();
    bed.hub.faults().inject(
        Operation::UpdateDevice,
        Fault::Fail(RegistryError::Unavailable("hub unavailable".to_string())),
    );
    bed.service.rotate("dev-1").await.unwrap_err();
    bed.log.clear();

    bed.service.repair("dev-1").await.unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "provisioning.get_attestation",
            "device.get_device",
            "device.update_device",
        ]
    );
}

#[tokio::test]
async fn test_repair_of_consistent_device_is_read_only() {
    let bed = TestBed::new();
    bed.service.enroll("dev-1").await.unwrap();
    bed.log.clear();

    bed.service.repair("dev-1").await.unwrap();

    assert_eq!(
        bed.log.entries(),
        vec!["provisioning.get_attestation", "device.get_device"]
    );
}

#[tokio::test]
async fn test_rotate_rereads_device_after_etag_conflict() {
    let bed = TestBed::new();
    bed.service.enroll("dev-1").await.unwrap();
    bed.log.clear();
    bed.hub.faults().inject(
        Operation::UpdateDevice,
        Fault::Fail(RegistryError::Conflict("stale eTag".to_string())),
    );

    bed.service.rotate("dev-1").await.unwrap();

    assert_eq!(
        bed.log.entries(),
        vec![
            "provisioning.lookup",
            "provisioning.create_or_update",
            "device.get_device",
            "device.update_device",
            "device.get_device",
            "device.update_device",
        ]
    );
    bed.assert_consistent("dev-1").await;
}

#[tokio::test]
async fn test_patch_desired_reads_then_writes_once() {
    let bed = TestBed::new();
    bed.service.enroll("dev-1").await.unwrap();
    bed.log.clear();
    bed.hub.faults().inject(
        Operation::UpdateTwin,
        Fault::Fail(RegistryError::Conflict("stale eTag".to_string())),
    );

    let patch = json!({"updater": "2.0.5"});
    let err = bed
        .service
        .patch_desired("dev-1", patch.as_object().unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, ProvisioningError::Conflict { .. }));
    assert_eq!(bed.log.entries(), vec!["device.get_twin", "device.update_twin"]);
}
