//! End-to-end device lifecycle against the in-memory registries.

use crate::test_utils::*;
use iotprov_core::ProvisioningConfig;
use iotprov_identity::{
    ConnectionInfo, EnrollOutcome, Fault, Operation, ProvisioningError, RegistryError,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_full_lifecycle() {
    let bed = TestBed::new();

    // Enroll
    let enrolled = bed.service.enroll("dps-iot-demo-001").await.unwrap();
    assert_eq!(enrolled.outcome, EnrollOutcome::Enrolled);
    assert_eq!(enrolled.assigned_hub, TEST_HUB);
    bed.assert_consistent("dps-iot-demo-001").await;

    // Rotate
    let rotated = bed.service.rotate("dps-iot-demo-001").await.unwrap();
    assert_ne!(rotated.primary(), enrolled.primary_connection.shared_access_key);
    bed.assert_consistent("dps-iot-demo-001").await;

    // Re-enrolling an enrolled device hands back the rotated keys
    let again = bed.service.enroll("dps-iot-demo-001").await.unwrap();
    assert_eq!(again.outcome, EnrollOutcome::AlreadyEnrolled);
    assert_eq!(again.primary_connection.shared_access_key, rotated.primary());

    // Descriptors for rotated keys
    let (primary, secondary) = ConnectionInfo::for_keys(
        &again.assigned_hub,
        &registration_id("dps-iot-demo-001"),
        &rotated,
    );
    assert_eq!(primary, again.primary_connection);
    assert_eq!(secondary, again.secondary_connection);

    // Twin
    let patch = json!({"updater": "2.0.5", "link": "https://example.invalid/pkg"});
    let twin = bed
        .service
        .patch_desired("dps-iot-demo-001", patch.as_object().unwrap())
        .await
        .unwrap();
    assert_eq!(serde_json::Value::Object(twin.desired), patch);
}

#[tokio::test]
async fn test_transient_failures_then_success() {
    let bed = TestBed::new();
    bed.provisioning.faults().inject(
        Operation::Lookup,
        Fault::Fail(RegistryError::Unavailable("throttled".to_string())),
    );
    bed.hub.faults().inject(
        Operation::Assign,
        Fault::Fail(RegistryError::Unavailable("hub unavailable".to_string())),
    );

    let mut attempts = 0;
    let result = loop {
        attempts += 1;
        match bed.service.enroll("dev-1").await {
            Ok(result) => break result,
            Err(err) if err.is_retryable() && attempts < 5 => continue,
            Err(err) => panic!("enroll failed: {err}"),
        }
    };

    assert_eq!(attempts, 3);
    assert_eq!(result.outcome, EnrollOutcome::Resumed);
    bed.assert_consistent("dev-1").await;
}

#[tokio::test]
async fn test_partial_rotation_repair_restores_consistency() {
    let bed = TestBed::new();
    bed.service.enroll("dev-1").await.unwrap();
    bed.hub.faults().inject(
        Operation::UpdateDevice,
        Fault::Fail(RegistryError::Unavailable("hub unavailable".to_string())),
    );

    let err = bed.service.rotate("dev-1").await.unwrap_err();
    assert!(matches!(err, ProvisioningError::PartialRotation { .. }));
    let (provisioning, device) = bed.keys("dev-1").await;
    assert_ne!(provisioning, device);

    let repaired = bed.service.repair("dev-1").await.unwrap();

    assert_eq!(Some(repaired), provisioning);
    bed.assert_consistent("dev-1").await;
}

#[tokio::test]
async fn test_rotation_and_enroll_serialize_per_device() {
    let bed = Arc::new(TestBed::new());
    bed.service.enroll("dev-1").await.unwrap();

    let mut handles = Vec::new();
    for n in 0..6 {
        let bed = Arc::clone(&bed);
        handles.push(tokio::spawn(async move {
            if n % 2 == 0 {
                bed.service.rotate("dev-1").await.map(|_| ())
            } else {
                bed.service.enroll("dev-1").await.map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    bed.assert_consistent("dev-1").await;
}

#[tokio::test]
async fn test_timeout_is_transient_and_keys_survive() {
    let mut config = ProvisioningConfig::default_config();
    config.call_timeout_ms = 25;
    let bed = TestBed::with_config(config);
    bed.service.enroll("dev-1").await.unwrap();
    let (before, _) = bed.keys("dev-1").await;

    bed.provisioning.faults().inject(Operation::Lookup, Fault::Hang);
    let err = bed.service.rotate("dev-1").await.unwrap_err();

    match err {
        ProvisioningError::TransientRegistry { source, .. } => {
            assert!(matches!(source, RegistryError::Timeout(_)));
        }
        other => panic!("expected TransientRegistry, got {other:?}"),
    }
    let (after, _) = bed.keys("dev-1").await;
    assert_eq!(before, after);
    bed.assert_consistent("dev-1").await;
}

#[tokio::test]
async fn test_service_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("iotprov.toml");
    std::fs::write(
        &path,
        r#"
provisioning_endpoint = "HostName=dps.example;SharedAccessKeyName=provisioningserviceowner"
hub_connection = "HostName=hub.example;SharedAccessKeyName=iothubowner"
global_device_endpoint = "global.azure-devices-provisioning.net"
id_scope = "0ne00AAAAAA"
iot_hub_host_name = "connect-iothub-dev.azure-devices.net"
call_timeout_ms = 5000
"#,
    )
    .unwrap();

    let config = ProvisioningConfig::from_file(&path).unwrap();
    assert_eq!(config.call_timeout_ms, 5000);
    let bed = TestBed::with_config(config);

    let result = bed.service.enroll("dev-1").await.unwrap();

    assert_eq!(result.assigned_hub, TEST_HUB);
    let enrollment = bed
        .provisioning
        .enrollment(&registration_id("dev-1"))
        .await
        .unwrap();
    assert_eq!(
        enrollment.iot_hub_host_name.as_deref(),
        Some("connect-iothub-dev.azure-devices.net")
    );
}
