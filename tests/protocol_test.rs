//! Integration tests for the protocol drivers against simulated devices.

mod common;

use common::mock_config;
use glaze::error::GlazeError;
use glaze::mock::open_mock_device;
use glaze::protocol::{CommandProtocol, FramedProtocol, ScanProtocol};

// =============================================================================
// Command protocol (v1)
// =============================================================================

#[tokio::test]
async fn test_v1_scan_cycle() {
    let mut driver = CommandProtocol::new(mock_config("mock_device"));
    driver.connect().await.unwrap();

    assert!(driver.write_settings().await.unwrap().starts_with("ACK"));
    assert!(driver.write_list().await.unwrap().starts_with("ACK"));
    let scan = driver.start_scan().await.unwrap();
    assert_eq!(scan.radii.len(), 100);
    assert!(scan.radii.iter().all(|r| *r >= 0.0));
    assert!(scan.angles.iter().all(|a| (-180.0..=180.0).contains(a)));

    driver.disconnect().await.unwrap();
    driver.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_v1_empty_responses_are_transport_faults() {
    let config = mock_config("mock_device_empty_responses");

    let transport = open_mock_device(&config).unwrap();
    let mut driver = CommandProtocol::with_transport(config.clone(), transport);
    let err = driver.write_settings().await.unwrap_err();
    assert!(matches!(err, GlazeError::Transport(_)), "unexpected error: {err}");

    let transport = open_mock_device(&config).unwrap();
    let mut driver = CommandProtocol::with_transport(config, transport);
    let err = driver.fetch_data().await.unwrap_err();
    assert!(matches!(err, GlazeError::Transport(_)), "unexpected error: {err}");
}

// =============================================================================
// Framed protocol (v2)
// =============================================================================

#[tokio::test]
async fn test_v2_scan_cycle() {
    let mut driver = FramedProtocol::new(mock_config("mock_device_v2"));
    driver.connect().await.unwrap();

    assert_eq!(
        driver.write_settings().await.unwrap(),
        "Settings written: integration_periods=1"
    );
    assert_eq!(
        driver.write_list().await.unwrap(),
        "Scanning list written: 100 points"
    );
    let raw = driver.fetch_data().await.unwrap();
    assert_eq!(raw.xs.len(), 100);
    assert_eq!(raw.ys.len(), 100);
    assert_eq!(raw.times, driver.scanning_list());

    driver.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_v2_empty_responses_are_transport_faults() {
    let config = mock_config("mock_device_v2_empty_responses");
    let transport = open_mock_device(&config).unwrap();
    let mut driver = FramedProtocol::with_transport(config, transport);

    driver.write_list().await.unwrap();
    let err = driver.fetch_data().await.unwrap_err();
    assert!(matches!(err, GlazeError::Transport(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_v2_connect_to_silent_device_fails() {
    let mut driver = FramedProtocol::new(mock_config("mock_device_v2_empty_responses"));
    let err = driver.connect().await.unwrap_err();
    assert!(matches!(err, GlazeError::Communication(ref msg) if msg.starts_with("Failed to connect to device")));
    assert!(matches!(
        driver.get_serial_number().await,
        Err(GlazeError::NotConnected)
    ));
}
