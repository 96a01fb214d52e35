//! High-level scanning client.

use super::async_scanner::AsyncScanner;
use super::waveform::UnprocessedWaveform;
use crate::config::DeviceConfiguration;
use crate::error::GlazeResult;
use futures::future::BoxFuture;

/// Opens a scanner, reads waveforms, and closes it again.
///
/// Prefer [`GlazeClient::scoped`], which guarantees the worker is stopped even when
/// the body fails:
///
/// ```rust,no_run
/// use glaze::config::DeviceConfiguration;
/// use glaze::scanning::GlazeClient;
///
/// # async fn demo() -> glaze::error::GlazeResult<()> {
/// let config = DeviceConfiguration::new("mock_device", "mock_delay");
/// let pulses = GlazeClient::scoped(config, |client| {
///     Box::pin(async move { client.read(2).await })
/// })
/// .await?;
/// assert_eq!(pulses.len(), 2);
/// # Ok(())
/// # }
/// ```
///
/// Dropping an open client cancels its worker without waiting for it.
#[derive(Debug)]
pub struct GlazeClient {
    config: DeviceConfiguration,
    scanner: AsyncScanner,
}

impl GlazeClient {
    /// Creates a closed client with default handle settings.
    pub fn new(config: DeviceConfiguration) -> Self {
        Self::with_scanner(config, AsyncScanner::default())
    }

    /// Creates a closed client around a custom handle.
    pub fn with_scanner(config: DeviceConfiguration, scanner: AsyncScanner) -> Self {
        Self { config, scanner }
    }

    /// Start scanning.
    pub async fn open(&mut self) -> GlazeResult<()> {
        self.scanner.start_scan(self.config.clone()).await
    }

    /// Stop scanning. Safe to call on a closed client.
    pub async fn close(&mut self) {
        self.scanner.stop_scan().await;
    }

    /// Whether the client is scanning.
    pub fn is_open(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Configuration the client scans with.
    pub fn config(&self) -> &DeviceConfiguration {
        &self.config
    }

    /// Read `n_pulses` waveforms captured after this call.
    pub async fn read(&mut self, n_pulses: usize) -> GlazeResult<Vec<UnprocessedWaveform>> {
        self.scanner.get_scans(n_pulses).await
    }

    /// Device serial number.
    pub async fn get_serial_number(&mut self) -> GlazeResult<String> {
        self.scanner.get_serial_number().await
    }

    /// Device firmware version.
    pub async fn get_firmware_version(&mut self) -> GlazeResult<String> {
        self.scanner.get_firmware_version().await
    }

    /// Open a client, run `body` with it, and close it whatever the outcome.
    pub async fn scoped<T, F>(config: DeviceConfiguration, body: F) -> GlazeResult<T>
    where
        F: for<'a> FnOnce(&'a mut GlazeClient) -> BoxFuture<'a, GlazeResult<T>>,
    {
        let mut client = Self::new(config);
        let result = match client.open().await {
            Ok(()) => body(&mut client).await,
            Err(err) => Err(err),
        };
        client.close().await;
        result
    }
}
