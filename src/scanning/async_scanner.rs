//! Handle controlling a background scan worker.

use super::queue::FreshestQueue;
use super::waveform::{TimestampedWaveform, UnprocessedWaveform};
use super::worker::{run_worker, HealthReport, WorkerChannels, WorkerRequest, HEALTH_CHANNEL_CAPACITY};
use crate::config::DeviceConfiguration;
use crate::error::{GlazeError, GlazeResult};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info, instrument, warn};

/// Default number of scans buffered between worker and handle.
pub const DEFAULT_QUEUE_MAXSIZE: usize = 10;

/// Default time allowed for the worker to connect and report.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const REQUEST_CHANNEL_CAPACITY: usize = 8;

/// Name of the thread running the scan worker.
const WORKER_THREAD_NAME: &str = "glaze-scan-worker";

#[derive(Debug)]
struct WorkerHandle {
    thread: thread::JoinHandle<()>,
    stop: Arc<AtomicBool>,
    cancel: Arc<Notify>,
    queue: Arc<FreshestQueue<TimestampedWaveform>>,
    health: mpsc::Receiver<HealthReport>,
    requests: mpsc::Sender<WorkerRequest>,
    scan_timeout: Duration,
}

impl WorkerHandle {
    /// Start the worker on a dedicated thread with its own runtime.
    ///
    /// The worker never shares an executor with the caller, so a device that answers
    /// without ever blocking cannot starve the handle.
    fn spawn(config: DeviceConfiguration, queue_maxsize: usize) -> GlazeResult<Self> {
        let scan_timeout = config.sweep_length() * 2 + Duration::from_secs(1);
        let queue = Arc::new(FreshestQueue::new(queue_maxsize));
        let stop = Arc::new(AtomicBool::new(false));
        let cancel = Arc::new(Notify::new());
        let (health_tx, health_rx) = mpsc::channel(HEALTH_CHANNEL_CAPACITY);
        let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);

        let channels = WorkerChannels {
            queue: Arc::clone(&queue),
            stop: Arc::clone(&stop),
            health: health_tx,
            requests: request_rx,
        };
        let worker_cancel = Arc::clone(&cancel);
        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker_thread(config, channels, worker_cancel))?;

        Ok(Self {
            thread,
            stop,
            cancel,
            queue,
            health: health_rx,
            requests: request_tx,
            scan_timeout,
        })
    }

    /// Signal the worker and wait for it to disconnect.
    async fn shutdown(self) {
        self.stop.store(true, Ordering::Release);
        drop(self.requests);
        let thread = self.thread;
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => error!("Scan worker panicked"),
            Err(err) => error!(error = %err, "Failed to join scan worker"),
        }
    }

    /// Signal the worker and cancel it without waiting.
    fn abort(self) {
        self.stop.store(true, Ordering::Release);
        self.cancel.notify_one();
    }
}

fn run_worker_thread(
    config: DeviceConfiguration,
    channels: WorkerChannels,
    cancel: Arc<Notify>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "Failed to create scan worker runtime");
            let _ = channels
                .health
                .blocking_send(HealthReport::failed(GlazeError::Io(err)));
            return;
        }
    };

    runtime.block_on(async move {
        tokio::select! {
            () = run_worker(config, channels) => {}
            () = cancel.notified() => debug!("Scan worker cancelled"),
        }
    });
}

/// Runs a [`Scanner`](super::Scanner) on a background thread and hands out its scans.
///
/// The worker scans continuously into a bounded queue that keeps only the freshest
/// `queue_maxsize` entries. Reads block for at most `2 × sweep + 1 s`; a worker that
/// failed reports its error on the next read.
///
/// # Example
///
/// ```rust,no_run
/// use glaze::config::DeviceConfiguration;
/// use glaze::scanning::AsyncScanner;
///
/// # async fn demo() -> glaze::error::GlazeResult<()> {
/// let mut scanner = AsyncScanner::default();
/// scanner.start_scan(DeviceConfiguration::new("mock_device", "mock_delay")).await?;
/// let averaged = scanner.get_next(4).await?;
/// println!("{} points", averaged.len());
/// scanner.stop_scan().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AsyncScanner {
    /// Number of scans buffered between worker and handle.
    pub queue_maxsize: usize,
    /// Time allowed for the worker to connect and send its first health report.
    pub startup_timeout: Duration,
    is_scanning: bool,
    worker: Option<WorkerHandle>,
}

impl Default for AsyncScanner {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_MAXSIZE, DEFAULT_STARTUP_TIMEOUT)
    }
}

impl AsyncScanner {
    /// Creates a stopped handle.
    pub fn new(queue_maxsize: usize, startup_timeout: Duration) -> Self {
        Self {
            queue_maxsize,
            startup_timeout,
            is_scanning: false,
            worker: None,
        }
    }

    /// Whether a healthy worker is producing scans.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Start a worker for `config` and wait for its startup report.
    ///
    /// A running worker is stopped first, so a handle can be restarted after a failure.
    #[instrument(skip(self, config), fields(port = %config.amp_port))]
    pub async fn start_scan(&mut self, config: DeviceConfiguration) -> GlazeResult<()> {
        self.stop_scan().await;

        let mut worker = WorkerHandle::spawn(config, self.queue_maxsize)?;
        let startup = tokio::time::timeout(self.startup_timeout, worker.health.recv()).await;
        let report = match startup {
            Ok(report) => report,
            Err(_) => {
                warn!(timeout = ?self.startup_timeout, "Scanner timed out during startup");
                worker.abort();
                return Err(GlazeError::StartupTimeout);
            }
        };

        match report {
            Some(HealthReport {
                is_alive: true,
                is_healthy: true,
                ..
            }) => {
                self.worker = Some(worker);
                self.is_scanning = true;
                info!("Scanning started");
                Ok(())
            }
            Some(report) => {
                worker.shutdown().await;
                Err(report.error.unwrap_or_else(|| {
                    GlazeError::WorkerFatal(Box::new(GlazeError::Communication(
                        "scan worker reported unhealthy without an error".into(),
                    )))
                }))
            }
            None => {
                worker.shutdown().await;
                Err(GlazeError::WorkerFatal(Box::new(GlazeError::Communication(
                    "scan worker exited without a health report".into(),
                ))))
            }
        }
    }

    /// Stop the worker and release the device. Idempotent.
    pub async fn stop_scan(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
            debug!("Scanning stopped");
        }
        self.is_scanning = false;
    }

    /// `n` waveforms whose capture started after this call.
    pub async fn get_scans(&mut self, n: usize) -> GlazeResult<Vec<UnprocessedWaveform>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let call_time = Utc::now();
        let mut scans = Vec::with_capacity(n);
        while scans.len() < n {
            let scan = self.get_scan().await?;
            if scan.timestamp >= call_time {
                scans.push(scan.waveform);
            }
        }
        Ok(scans)
    }

    /// Average of the next `averaged_over_n` queued waveforms.
    pub async fn get_next(&mut self, averaged_over_n: usize) -> GlazeResult<UnprocessedWaveform> {
        let mut waveforms = Vec::with_capacity(averaged_over_n.max(1));
        for _ in 0..averaged_over_n.max(1) {
            waveforms.push(self.get_scan().await?.waveform);
        }
        UnprocessedWaveform::average(&waveforms)
    }

    /// Device serial number, read by the worker between two scans.
    pub async fn get_serial_number(&mut self) -> GlazeResult<String> {
        self.request(|response| WorkerRequest::GetSerialNumber { response })
            .await
    }

    /// Device firmware version, read by the worker between two scans.
    pub async fn get_firmware_version(&mut self) -> GlazeResult<String> {
        self.request(|response| WorkerRequest::GetFirmwareVersion { response })
            .await
    }

    async fn request(
        &mut self,
        build: impl FnOnce(oneshot::Sender<GlazeResult<String>>) -> WorkerRequest,
    ) -> GlazeResult<String> {
        let worker = match self.worker.as_ref() {
            Some(worker) if self.is_scanning => worker,
            _ => return Err(GlazeError::NotScanning),
        };
        let (tx, rx) = oneshot::channel();
        worker
            .requests
            .send(build(tx))
            .await
            .map_err(|_| GlazeError::NotScanning)?;
        match tokio::time::timeout(worker.scan_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(GlazeError::NotScanning),
            Err(_) => Err(GlazeError::ScanTimeout),
        }
    }

    /// Next queued scan, bounded by the scan timeout.
    async fn get_scan(&mut self) -> GlazeResult<TimestampedWaveform> {
        let worker = self.worker.as_mut().ok_or(GlazeError::NotScanning)?;
        let queue = Arc::clone(&worker.queue);
        let report = tokio::select! {
            biased;
            scan = queue.pop() => return Ok(scan),
            report = worker.health.recv() => report,
            _ = tokio::time::sleep(worker.scan_timeout) => match worker.health.try_recv() {
                Ok(report) => Some(report),
                Err(_) => return Err(GlazeError::ScanTimeout),
            },
        };

        match report {
            Some(report) => {
                if !report.is_alive {
                    self.is_scanning = false;
                }
                match report.error {
                    Some(err) => Err(GlazeError::WorkerFatal(Box::new(err))),
                    None => Err(GlazeError::ScanTimeout),
                }
            }
            None => {
                self.is_scanning = false;
                Err(GlazeError::ScanTimeout)
            }
        }
    }
}

impl Drop for AsyncScanner {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config(port: &str) -> DeviceConfiguration {
        let mut config = DeviceConfiguration::new(port, "mock_delay");
        config.n_points = 100;
        config.integration_periods = 1;
        config.amp_timeout_seconds = 7.0;
        config
    }

    #[tokio::test]
    async fn test_start_stop() {
        let mut scanner = AsyncScanner::default();
        scanner.start_scan(mock_config("mock_device")).await.unwrap();
        assert!(scanner.is_scanning());
        scanner.stop_scan().await;
        assert!(!scanner.is_scanning());
        // Stopping again is a no-op.
        scanner.stop_scan().await;
    }

    #[tokio::test]
    async fn test_zero_startup_timeout() {
        let mut scanner = AsyncScanner::new(DEFAULT_QUEUE_MAXSIZE, Duration::ZERO);
        let err = scanner.start_scan(mock_config("mock_device")).await.unwrap_err();
        assert!(matches!(err, GlazeError::StartupTimeout));
        assert!(!scanner.is_scanning());
    }

    fn waveform(marker: f64) -> UnprocessedWaveform {
        UnprocessedWaveform::new(vec![0.0], vec![marker]).unwrap()
    }

    /// Handle around a hand-fed queue instead of a device.
    fn handle_with_queue(
        queue: Arc<FreshestQueue<TimestampedWaveform>>,
    ) -> (AsyncScanner, mpsc::Sender<HealthReport>) {
        let (health_tx, health_rx) = mpsc::channel(HEALTH_CHANNEL_CAPACITY);
        let (request_tx, _request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let worker = WorkerHandle {
            thread: thread::spawn(|| {}),
            stop: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(Notify::new()),
            queue,
            health: health_rx,
            requests: request_tx,
            scan_timeout: Duration::from_secs(5),
        };
        let mut scanner = AsyncScanner::default();
        scanner.worker = Some(worker);
        scanner.is_scanning = true;
        (scanner, health_tx)
    }

    #[tokio::test]
    async fn test_get_scans_skips_entries_captured_before_the_call() {
        let queue = Arc::new(FreshestQueue::new(DEFAULT_QUEUE_MAXSIZE));
        let stale = Utc::now() - chrono::Duration::seconds(1);
        for marker in [1.0, 2.0, 3.0] {
            queue.push(TimestampedWaveform {
                timestamp: stale,
                waveform: waveform(marker),
            });
        }
        let (mut scanner, _health) = handle_with_queue(Arc::clone(&queue));

        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            for marker in [10.0, 11.0] {
                producer.push(TimestampedWaveform {
                    timestamp: Utc::now(),
                    waveform: waveform(marker),
                });
                producer.push(TimestampedWaveform {
                    timestamp: stale,
                    waveform: waveform(-marker),
                });
            }
        });

        let scans = scanner.get_scans(2).await.unwrap();
        let markers: Vec<f64> = scans.iter().map(|scan| scan.signal[0]).collect();
        assert_eq!(markers, vec![10.0, 11.0]);
    }

    #[tokio::test]
    async fn test_framed_worker_does_not_starve_caller() {
        // Default single-threaded test runtime.
        let mut scanner = AsyncScanner::default();
        let result = tokio::time::timeout(Duration::from_secs(10), async {
            scanner.start_scan(mock_config("mock_device_v2")).await?;
            scanner.get_next(1).await
        })
        .await;

        let waveform = result.expect("handle starved by worker").unwrap();
        assert_eq!(waveform.len(), 100);
        scanner.stop_scan().await;
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_requests_need_running_worker() {
        let mut scanner = AsyncScanner::default();
        assert!(matches!(
            scanner.get_serial_number().await,
            Err(GlazeError::NotScanning)
        ));
        assert!(matches!(
            scanner.get_scans(1).await,
            Err(GlazeError::NotScanning)
        ));
    }
}
