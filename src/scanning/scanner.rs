//! Synchronous-style scanner on top of a negotiated protocol driver.

use super::waveform::UnprocessedWaveform;
use crate::config::DeviceConfiguration;
use crate::error::GlazeResult;
use crate::error_recovery::{retry_async, RetryPolicy};
use crate::protocol::{negotiate, ScanProtocol};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Performs single scans against one scanner.
///
/// A `Scanner` owns its driver and must only be used from one task at a time. The
/// [`AsyncScanner`](super::AsyncScanner) runs one inside its background worker.
pub struct Scanner {
    config: DeviceConfiguration,
    protocol: Box<dyn ScanProtocol>,
    scan_policy: RetryPolicy,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("port", &self.config.amp_port)
            .field("protocol", &self.protocol.protocol_version())
            .finish()
    }
}

impl Scanner {
    /// Negotiate a protocol with the device and upload settings and the scan list.
    #[instrument(skip(config), fields(port = %config.amp_port))]
    pub async fn new(config: DeviceConfiguration) -> GlazeResult<Self> {
        config.validate()?;
        let protocol = negotiate(&config).await?;
        Self::with_protocol(config, protocol).await
    }

    /// Use an explicit, already connected driver.
    pub async fn with_protocol(
        config: DeviceConfiguration,
        mut protocol: Box<dyn ScanProtocol>,
    ) -> GlazeResult<Self> {
        let settings = protocol.write_settings().await?;
        debug!(response = %settings, "Settings written");
        let list = protocol.write_list().await?;
        debug!(response = %list, "Scan list written");
        info!(
            version = protocol.protocol_version(),
            points = config.n_points,
            "Scanner ready"
        );
        Ok(Self {
            config,
            protocol,
            scan_policy: RetryPolicy::exponential(2, Duration::from_millis(10)),
        })
    }

    /// Run one sweep. One transient failure is tolerated.
    pub async fn scan(&mut self) -> GlazeResult<UnprocessedWaveform> {
        let scan = retry_async(&self.scan_policy, "scan", self.protocol.as_mut(), |protocol| {
            protocol.start_scan()
        })
        .await?;
        Ok(UnprocessedWaveform::from(scan))
    }

    /// Current configuration.
    pub fn config(&self) -> &DeviceConfiguration {
        &self.config
    }

    /// Version tag of the driver in use.
    pub fn protocol_version(&self) -> &'static str {
        self.protocol.protocol_version()
    }

    /// Reconnect with a new configuration.
    ///
    /// The current driver is disconnected and discarded, then a new one is negotiated
    /// and configured.
    pub async fn update_config(&mut self, config: DeviceConfiguration) -> GlazeResult<()> {
        self.protocol.disconnect().await?;
        let replacement = Self::new(config).await?;
        *self = replacement;
        Ok(())
    }

    /// Device serial number.
    pub async fn get_serial_number(&mut self) -> GlazeResult<String> {
        self.protocol.get_serial_number().await
    }

    /// Device firmware version.
    pub async fn get_firmware_version(&mut self) -> GlazeResult<String> {
        self.protocol.get_firmware_version().await
    }

    /// Close the link to the device.
    pub async fn disconnect(&mut self) -> GlazeResult<()> {
        self.protocol.disconnect().await
    }
}
