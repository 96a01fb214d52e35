//! Integration tests for single scans through a negotiated driver.

mod common;

use common::{mock_config, MISSING_PORT};
use glaze::error::GlazeError;
use glaze::scanning::Scanner;

#[tokio::test]
async fn test_scan_has_configured_length() {
    let mut scanner = Scanner::new(mock_config("mock_device")).await.unwrap();
    assert_eq!(scanner.protocol_version(), "v1");

    let waveform = scanner.scan().await.unwrap();
    assert_eq!(waveform.len(), 100);
    assert_eq!(waveform.time.len(), waveform.signal.len());
    // Time axis is the scan list scaled to the delay window.
    assert_eq!(waveform.time[0], 0.0);
    assert!(waveform.time.windows(2).all(|pair| pair[0] <= pair[1]));

    scanner.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_framed_scan_has_configured_length() {
    let mut scanner = Scanner::new(mock_config("mock_device_v2")).await.unwrap();
    assert_eq!(scanner.protocol_version(), "v2");
    assert_eq!(scanner.scan().await.unwrap().len(), 100);
}

#[tokio::test]
async fn test_first_scan_failure_is_retried() {
    for port in ["mock_device_fail_first_scan", "mock_device_v2_fail_first_scan"] {
        let mut scanner = Scanner::new(mock_config(port)).await.unwrap();
        assert_eq!(scanner.scan().await.unwrap().len(), 100, "port {port}");
        assert_eq!(scanner.scan().await.unwrap().len(), 100, "port {port}");
    }
}

#[tokio::test]
async fn test_persistent_scan_failure_is_transport_fault() {
    let mut scanner = Scanner::new(mock_config("mock_device_scan_should_fail"))
        .await
        .unwrap();
    let err = scanner.scan().await.unwrap_err();
    assert!(err.is_transport_fault(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_missing_port_is_transport_fault() {
    let err = Scanner::new(mock_config(MISSING_PORT)).await.unwrap_err();
    assert!(err.is_transport_fault(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected_before_connecting() {
    let mut config = mock_config("mock_device");
    config.n_points = 0;
    assert!(matches!(
        Scanner::new(config).await,
        Err(GlazeError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_oversized_timeout_is_an_error_not_a_panic() {
    let mut config = mock_config("mock_device");
    config.amp_timeout_seconds = 1e300;
    let result = tokio::spawn(Scanner::new(config)).await;
    let result = result.expect("Scanner::new panicked");
    assert!(matches!(result, Err(GlazeError::Configuration(_))));
}

#[tokio::test]
async fn test_update_config_reconnects() {
    let mut scanner = Scanner::new(mock_config("mock_device")).await.unwrap();
    assert_eq!(scanner.scan().await.unwrap().len(), 100);

    let mut config = mock_config("mock_device_v2");
    config.n_points = 40;
    scanner.update_config(config).await.unwrap();

    assert_eq!(scanner.protocol_version(), "v2");
    assert_eq!(scanner.config().n_points, 40);
    assert_eq!(scanner.scan().await.unwrap().len(), 40);
}

#[tokio::test]
async fn test_identification() {
    let mut v1 = Scanner::new(mock_config("mock_device")).await.unwrap();
    assert_eq!(v1.get_serial_number().await.unwrap(), "X-9999");
    assert_eq!(v1.get_firmware_version().await.unwrap(), "v0.1.0");

    let mut v2 = Scanner::new(mock_config("mock_device_v2")).await.unwrap();
    assert_eq!(v2.get_serial_number().await.unwrap(), "M-9999");
    assert_eq!(v2.get_firmware_version().await.unwrap(), "UART-OS V0.1");
}
