//! Driver bound directly to a simulated command-protocol device.

use super::{unknown_mock, CommandMockDevice, MockBehavior};
use crate::config::{scanning_list, DeviceConfiguration};
use crate::error::{GlazeError, GlazeResult};
use crate::protocol::frame::{decode_f32_le, encode_f32_le};
use crate::protocol::{PolarScan, RawScan, ScanProtocol};
use crate::transport::{Transport, LINE_DELIMITER};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::time::sleep;
use tracing::debug;

const SERIAL_NUMBER_BYTES: usize = 6;

/// Protocol driver for [`CommandMockDevice`], without retries.
///
/// Unlike [`crate::protocol::CommandProtocol`] this driver reads the serial number
/// from the device. Register it under a device type of your choice to negotiate
/// against simulated hardware only:
///
/// ```rust
/// use glaze::mock::MockProtocol;
/// use glaze::protocol::register_protocol;
///
/// register_protocol("LeMock", "v1", MockProtocol::boxed);
/// ```
pub struct MockProtocol {
    config: DeviceConfiguration,
    scanning_list: Vec<f32>,
    device: Option<CommandMockDevice>,
}

impl MockProtocol {
    /// Creates a disconnected driver.
    pub fn new(config: DeviceConfiguration) -> Self {
        Self {
            scanning_list: scanning_list(&config),
            config,
            device: None,
        }
    }

    /// Constructor suitable for [`crate::protocol::register_protocol`].
    pub fn boxed(config: DeviceConfiguration) -> Box<dyn ScanProtocol> {
        Box::new(Self::new(config))
    }

    fn device(&mut self) -> GlazeResult<&mut CommandMockDevice> {
        self.device.as_mut().ok_or(GlazeError::NotConnected)
    }

    async fn command(&mut self, command: u8) -> GlazeResult<String> {
        self.exchange(&[command]).await
    }

    /// Writes `request` and reads one non-empty response line.
    async fn exchange(&mut self, request: &[u8]) -> GlazeResult<String> {
        let device = self.device()?;
        device.write(request).await?;
        let line = device.read_until(LINE_DELIMITER).await?;
        let response = String::from_utf8_lossy(&line).trim().to_string();
        if response.is_empty() {
            return Err(GlazeError::Transport(format!(
                "Request of {} bytes. Empty response received",
                request.len()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ScanProtocol for MockProtocol {
    fn protocol_version(&self) -> &'static str {
        "v1"
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(
            feature,
            "scan" | "status" | "settings" | "list" | "serial_number" | "firmware_version"
        )
    }

    async fn connect(&mut self) -> GlazeResult<()> {
        let port = self.config.amp_port.as_str();
        let behavior = port
            .strip_prefix("mock_device")
            .filter(|variant| !variant.starts_with("_v2"))
            .and_then(MockBehavior::for_variant)
            .ok_or_else(|| unknown_mock(port))?;
        self.device = Some(CommandMockDevice::new(behavior, self.config.read_timeout()?));
        debug!(port, "Connected to simulated device");
        Ok(())
    }

    async fn disconnect(&mut self) -> GlazeResult<()> {
        if let Some(mut device) = self.device.take() {
            device.close().await?;
        }
        Ok(())
    }

    async fn write_settings(&mut self) -> GlazeResult<String> {
        self.command(b'S').await?;
        let n_points = u16::try_from(self.scanning_list.len()).map_err(|_| {
            GlazeError::Configuration(format!(
                "n_points {} does not fit the settings frame",
                self.scanning_list.len()
            ))
        })?;
        let periods = u16::try_from(self.config.integration_periods).map_err(|_| {
            GlazeError::Configuration(format!(
                "integration_periods {} does not fit the settings frame",
                self.config.integration_periods
            ))
        })?;
        let mut payload = BytesMut::with_capacity(6);
        payload.put_u16_le(n_points);
        payload.put_u16_le(periods);
        payload.put_u16_le(u16::from(self.config.use_ema));
        self.exchange(&payload).await
    }

    async fn write_list(&mut self) -> GlazeResult<String> {
        self.command(b'L').await?;
        let payload = encode_f32_le(&self.scanning_list);
        self.exchange(&payload).await
    }

    async fn start_scan(&mut self) -> GlazeResult<PolarScan> {
        self.command(b'G').await?;
        let poll = self.config.sweep_length() / 100;
        while !self.get_status().await?.contains("Idle") {
            sleep(poll).await;
        }
        let raw = self.fetch_data().await?;
        Ok(PolarScan::from(raw))
    }

    async fn get_status(&mut self) -> GlazeResult<String> {
        self.command(b'H').await
    }

    async fn fetch_data(&mut self) -> GlazeResult<RawScan> {
        let n = self.scanning_list.len();
        let device = self.device()?;
        device.write(b"R").await?;
        let bytes = device.read(n * 12).await?;
        if bytes.len() != n * 12 {
            return Err(GlazeError::Transport(format!(
                "received {} bytes, expected {}",
                bytes.len(),
                n * 12
            )));
        }
        let values = decode_f32_le(&bytes);
        Ok(RawScan {
            times: values[..n].to_vec(),
            xs: values[n..2 * n].to_vec(),
            ys: values[2 * n..].to_vec(),
        })
    }

    async fn get_serial_number(&mut self) -> GlazeResult<String> {
        let device = self.device()?;
        device.write(b"s").await?;
        let bytes = device.read(SERIAL_NUMBER_BYTES).await?;
        if bytes.is_empty() {
            return Err(GlazeError::Transport(
                "Serial number request. Empty response received".into(),
            ));
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn get_firmware_version(&mut self) -> GlazeResult<String> {
        self.command(b'v').await
    }
}
