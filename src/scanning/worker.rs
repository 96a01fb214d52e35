//! Background scan worker.
//!
//! The worker runs on its own thread and runtime and owns its [`Scanner`] (and with
//! it the serial link) for its whole life. It talks to the owning [`AsyncScanner`](super::AsyncScanner) through:
//!
//! - a [`FreshestQueue`] of timestamped waveforms,
//! - a health channel carrying at most two [`HealthReport`]s (startup, failure),
//! - a request channel for identification queries served between scans,
//! - a shared stop flag checked once per loop iteration.

use super::queue::FreshestQueue;
use super::scanner::Scanner;
use super::waveform::TimestampedWaveform;
use crate::config::DeviceConfiguration;
use crate::error::{GlazeError, GlazeResult};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

/// Capacity of the health channel: one startup report plus one terminal report.
pub(crate) const HEALTH_CHANNEL_CAPACITY: usize = 2;

/// Liveness message sent by the worker.
#[derive(Debug)]
pub struct HealthReport {
    /// The worker is still running.
    pub is_alive: bool,
    /// The worker can produce scans.
    pub is_healthy: bool,
    /// Failure that ended or prevented scanning.
    pub error: Option<GlazeError>,
}

impl HealthReport {
    pub(crate) fn healthy() -> Self {
        Self {
            is_alive: true,
            is_healthy: true,
            error: None,
        }
    }

    pub(crate) fn failed(error: GlazeError) -> Self {
        Self {
            is_alive: false,
            is_healthy: false,
            error: Some(error),
        }
    }
}

/// Queries the worker answers between two scans.
#[derive(Debug)]
pub enum WorkerRequest {
    /// Read the device serial number.
    GetSerialNumber {
        /// Reply channel.
        response: oneshot::Sender<GlazeResult<String>>,
    },
    /// Read the device firmware version.
    GetFirmwareVersion {
        /// Reply channel.
        response: oneshot::Sender<GlazeResult<String>>,
    },
}

/// Worker side of the channels shared with the handle.
pub(crate) struct WorkerChannels {
    pub(crate) queue: Arc<FreshestQueue<TimestampedWaveform>>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) health: mpsc::Sender<HealthReport>,
    pub(crate) requests: mpsc::Receiver<WorkerRequest>,
}

/// Body of the worker.
pub(crate) async fn run_worker(config: DeviceConfiguration, mut channels: WorkerChannels) {
    let mut scanner = match Scanner::new(config).await {
        Ok(scanner) => {
            report(&channels.health, HealthReport::healthy()).await;
            scanner
        }
        Err(err) => {
            error!(error = %err, "Scanner failed to start");
            report(&channels.health, HealthReport::failed(err)).await;
            return;
        }
    };
    info!(version = scanner.protocol_version(), "Scan worker started");

    while !channels.stop.load(Ordering::Acquire) {
        serve_requests(&mut scanner, &mut channels.requests).await;

        let timestamp = Utc::now();
        match scanner.scan().await {
            Ok(waveform) => {
                if channels
                    .queue
                    .push(TimestampedWaveform { timestamp, waveform })
                    .is_some()
                {
                    trace!("Queue full, dropped oldest scan");
                }
            }
            Err(err) => {
                error!(error = %err, "Scan failed, stopping worker");
                report(&channels.health, HealthReport::failed(err)).await;
                break;
            }
        }

        // Devices that answer without blocking would otherwise never let a cancel through.
        tokio::task::yield_now().await;
    }

    let dropped = channels.queue.drain().len();
    if let Err(err) = scanner.disconnect().await {
        warn!(error = %err, "Failed to disconnect scanner");
    }
    debug!(dropped, "Scan worker stopped");
}

async fn serve_requests(scanner: &mut Scanner, requests: &mut mpsc::Receiver<WorkerRequest>) {
    while let Ok(request) = requests.try_recv() {
        match request {
            WorkerRequest::GetSerialNumber { response } => {
                let _ = response.send(scanner.get_serial_number().await);
            }
            WorkerRequest::GetFirmwareVersion { response } => {
                let _ = response.send(scanner.get_firmware_version().await);
            }
        }
    }
}

async fn report(health: &mpsc::Sender<HealthReport>, report: HealthReport) {
    if health.send(report).await.is_err() {
        debug!("Scanner handle gone, health report dropped");
    }
}
