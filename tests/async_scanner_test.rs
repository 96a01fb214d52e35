//! Integration tests for the background scan worker and its handle.

mod common;

use common::{mock_config, MISSING_PORT};
use glaze::error::GlazeError;
use glaze::scanning::AsyncScanner;
use std::time::Duration;

#[tokio::test]
async fn test_get_next_single_and_averaged() {
    let mut scanner = AsyncScanner::default();
    scanner.start_scan(mock_config("mock_device")).await.unwrap();

    let single = scanner.get_next(1).await.unwrap();
    assert_eq!(single.len(), 100);

    let averaged = scanner.get_next(2).await.unwrap();
    assert_eq!(averaged.len(), 100);
    assert!(averaged.signal.iter().all(|v| v.is_finite()));

    scanner.stop_scan().await;
    assert!(!scanner.is_scanning());
}

#[tokio::test]
async fn test_get_scans_on_framed_device() {
    let mut scanner = AsyncScanner::default();
    scanner.start_scan(mock_config("mock_device_v2")).await.unwrap();

    let scans = scanner.get_scans(3).await.unwrap();
    assert_eq!(scans.len(), 3);
    assert!(scans.iter().all(|scan| scan.len() == 100));

    scanner.stop_scan().await;
}

#[tokio::test]
async fn test_get_scans_zero_returns_immediately() {
    let mut scanner = AsyncScanner::default();
    scanner.start_scan(mock_config("mock_device_instant")).await.unwrap();
    assert!(scanner.get_scans(0).await.unwrap().is_empty());
    scanner.stop_scan().await;
}

#[tokio::test]
async fn test_small_queue_keeps_producing() {
    let mut scanner = AsyncScanner::new(1, Duration::from_secs(10));
    scanner.start_scan(mock_config("mock_device")).await.unwrap();
    // Let the worker overflow the queue a few times.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(scanner.get_scans(2).await.unwrap().len(), 2);
    scanner.stop_scan().await;
}

#[tokio::test]
async fn test_fatal_scan_error_reaches_caller() {
    let mut scanner = AsyncScanner::default();
    scanner
        .start_scan(mock_config("mock_device_scan_should_fail"))
        .await
        .unwrap();

    let err = scanner.get_scans(1).await.unwrap_err();
    assert!(matches!(err, GlazeError::WorkerFatal(_)), "unexpected error: {err}");
    assert!(err.is_transport_fault());
    assert!(!scanner.is_scanning());

    // The failed worker has already exited, so joining it is immediate.
    tokio::time::timeout(Duration::from_secs(2), scanner.stop_scan())
        .await
        .expect("stop_scan after a fatal error did not return");
    assert!(!scanner.is_scanning());
}

#[tokio::test]
async fn test_restart_after_failure() {
    let mut scanner = AsyncScanner::default();
    scanner
        .start_scan(mock_config("mock_device_scan_should_fail"))
        .await
        .unwrap();
    assert!(scanner.get_next(1).await.is_err());
    assert!(!scanner.is_scanning());

    scanner.start_scan(mock_config("mock_device")).await.unwrap();
    assert!(scanner.is_scanning());
    assert_eq!(scanner.get_next(1).await.unwrap().len(), 100);
    scanner.stop_scan().await;
}

#[tokio::test]
async fn test_start_on_missing_port_fails() {
    let mut scanner = AsyncScanner::default();
    let err = scanner.start_scan(mock_config(MISSING_PORT)).await.unwrap_err();
    assert!(err.is_transport_fault(), "unexpected error: {err}");
    assert!(!scanner.is_scanning());
}

#[tokio::test]
async fn test_start_on_unknown_mock_fails_negotiation() {
    let mut scanner = AsyncScanner::default();
    let err = scanner
        .start_scan(mock_config("mock_device_does_not_exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, GlazeError::Negotiation { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn test_identification_through_worker() {
    let mut scanner = AsyncScanner::default();
    scanner.start_scan(mock_config("mock_device_v2")).await.unwrap();
    assert_eq!(scanner.get_serial_number().await.unwrap(), "M-9999");
    assert_eq!(scanner.get_firmware_version().await.unwrap(), "UART-OS V0.1");
    scanner.stop_scan().await;

    assert!(matches!(
        scanner.get_serial_number().await,
        Err(GlazeError::NotScanning)
    ));
}
