//! Integration tests for protocol negotiation and the process-wide registry.

mod common;

use common::{mock_config, MISSING_PORT};
use glaze::error::GlazeError;
use glaze::mock::MockProtocol;
use glaze::protocol::{
    detect_protocol_version, get_protocol, list_supported_versions, negotiate, register_protocol,
    ScanProtocol, SUPPORTED_VERSIONS,
};

#[tokio::test]
async fn test_command_device_falls_back_to_v1() {
    let mut driver = negotiate(&mock_config("mock_device")).await.unwrap();
    assert_eq!(driver.protocol_version(), "v1");
    assert!(driver.supports_feature("status_check"));
    driver.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_framed_device_negotiates_v2() {
    let mut driver = negotiate(&mock_config("mock_device_v2")).await.unwrap();
    assert_eq!(driver.protocol_version(), "v2");
    assert!(driver.supports_feature("header_based_protocol"));
    assert_eq!(driver.get_status().await.unwrap(), "IDLE");
    driver.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_detect_protocol_version() {
    assert_eq!(
        detect_protocol_version(&mock_config("mock_device")).await.unwrap(),
        "v1"
    );
    assert_eq!(
        detect_protocol_version(&mock_config("mock_device_v2_instant"))
            .await
            .unwrap(),
        "v2"
    );
}

#[tokio::test]
async fn test_missing_port_aborts_negotiation() {
    let err = negotiate(&mock_config(MISSING_PORT)).await.err();
    assert!(
        err.as_ref().is_some_and(GlazeError::is_transport_fault),
        "unexpected result: {err:?}"
    );
}

#[tokio::test]
async fn test_explicit_version_is_not_connected() {
    let mut driver = get_protocol(&mock_config("mock_device"), Some("v1"))
        .await
        .unwrap();
    assert_eq!(driver.protocol_version(), "v1");
    assert!(matches!(
        driver.get_status().await,
        Err(GlazeError::NotConnected)
    ));

    driver.connect().await.unwrap();
    assert_eq!(driver.get_status().await.unwrap(), "ACK: Idle.");
    driver.disconnect().await.unwrap();

    assert!(matches!(
        get_protocol(&mock_config("mock_device"), Some("v7")).await,
        Err(GlazeError::Configuration(_))
    ));
}

#[test]
fn test_default_versions_are_listed() {
    let versions = list_supported_versions();
    let le = &versions["Le"];
    for version in SUPPORTED_VERSIONS {
        assert!(le.iter().any(|v| v == version), "missing {version}");
    }
}

#[test]
fn test_register_protocol_adds_device_type() {
    register_protocol("GlazeTestDevice", "v1", MockProtocol::boxed);
    let versions = list_supported_versions();
    assert_eq!(versions["GlazeTestDevice"], vec!["v1".to_string()]);
    assert!(versions.contains_key("Le"));
}
