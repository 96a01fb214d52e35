//! Single-byte command protocol ("v1").
//!
//! This is the protocol spoken by deployed scanners:
//! - Commands are single ASCII bytes: `S` settings, `L` list, `G` go, `R` read,
//!   `H` status, `s` serial number, `v` firmware version.
//! - Text responses are `\n`-terminated. Acknowledgements start with `ACK`.
//! - Scan data is a raw block of `3 × n` little-endian `f32` (delays, X, Y).
//!
//! Response reads are retried with exponential backoff. An empty response is a
//! transport fault; once the retry budget is spent the last fault propagates unchanged.

use super::{PolarScan, RawScan, ScanProtocol};
use crate::config::{scanning_list, DeviceConfiguration};
use crate::error::{GlazeError, GlazeResult};
use crate::error_recovery::{retry_async, RetryPolicy};
use crate::protocol::frame::{decode_f32_le, encode_f32_le};
use crate::transport::{open_transport, Transport, LINE_DELIMITER};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// Acknowledgement prefix.
pub const OK_RESPONSE: &str = "ACK";
/// Status line while a sweep is running.
pub const STATUS_SCANNING: &str = "Error: Scan is ongoing.";
/// Status line of an idle device.
pub const STATUS_IDLE: &str = "ACK: Idle.";

/// Serial number reported without querying the device.
const PLACEHOLDER_SERIAL_NUMBER: &str = "X-9999";

const START_COMMAND: u8 = b'G';
const FETCH_COMMAND: u8 = b'R';
const STATUS_COMMAND: u8 = b'H';
const SEND_LIST_COMMAND: u8 = b'L';
const SEND_SETTINGS_COMMAND: u8 = b'S';
const FIRMWARE_VERSION_COMMAND: u8 = b'v';

/// Driver for the single-byte command protocol.
pub struct CommandProtocol {
    config: DeviceConfiguration,
    scanning_list: Vec<f32>,
    transport: Option<Box<dyn Transport>>,
    response_policy: RetryPolicy,
    scan_policy: RetryPolicy,
}

impl CommandProtocol {
    /// Creates a disconnected driver. The scan point list is computed once here.
    pub fn new(config: DeviceConfiguration) -> Self {
        Self {
            scanning_list: scanning_list(&config),
            config,
            transport: None,
            response_policy: RetryPolicy::exponential(3, Duration::from_millis(10)),
            scan_policy: RetryPolicy::exponential(5, Duration::from_millis(10)),
        }
    }

    /// Creates a driver bound to an already open transport.
    pub fn with_transport(config: DeviceConfiguration, transport: Box<dyn Transport>) -> Self {
        let mut driver = Self::new(config);
        driver.transport = Some(transport);
        driver
    }

    /// Constructor registered under `"v1"`.
    pub fn boxed(config: DeviceConfiguration) -> Box<dyn ScanProtocol> {
        Box::new(Self::new(config))
    }

    /// Delay positions written to the device.
    pub fn scanning_list(&self) -> &[f32] {
        &self.scanning_list
    }

    /// Number of bytes in one scan readout: three `f32` arrays.
    pub fn bytes_to_receive(&self) -> usize {
        self.scanning_list.len() * 12
    }

    fn port(&mut self) -> GlazeResult<&mut dyn Transport> {
        match self.transport.as_deref_mut() {
            Some(port) => Ok(port),
            None => Err(GlazeError::NotConnected),
        }
    }

    async fn send_command(&mut self, command: u8) -> GlazeResult<()> {
        self.port()?.write(&[command]).await
    }

    /// Reads one response line, retrying empty and unexpected responses.
    async fn get_response(&mut self, command: u8, check_ack: bool) -> GlazeResult<String> {
        let policy = &self.response_policy;
        let port = self
            .transport
            .as_deref_mut()
            .ok_or(GlazeError::NotConnected)?;
        let command = char::from(command);
        retry_async(policy, "read response", port, |port| {
            Box::pin(async move {
                let bytes = port.read_until(LINE_DELIMITER).await?;
                let response = String::from_utf8_lossy(&bytes).trim().to_string();
                if response.is_empty() {
                    return Err(GlazeError::Transport(format!(
                        "Command: '{command}'. Empty response received"
                    )));
                }
                if check_ack && !response.starts_with(OK_RESPONSE) {
                    return Err(GlazeError::Communication(format!(
                        "Command: '{command}'. Expected response '{OK_RESPONSE}', received: '{response}'"
                    )));
                }
                Ok(response)
            })
        })
        .await
    }

    async fn send_and_acknowledge(&mut self, command: u8, check_ack: bool) -> GlazeResult<String> {
        self.send_command(command).await?;
        self.get_response(command, check_ack).await
    }

    async fn await_scan_finished(&mut self) -> GlazeResult<()> {
        let sweep = self.config.sweep_length();
        sleep(sweep).await;
        let mut status = self.send_and_acknowledge(STATUS_COMMAND, false).await?;
        while status == STATUS_SCANNING {
            sleep(sweep / 100).await;
            status = self.send_and_acknowledge(STATUS_COMMAND, false).await?;
        }
        Ok(())
    }

    /// Sends `R` and reads the full data block, resending on short reads.
    async fn read_scan(&mut self) -> GlazeResult<RawScan> {
        let expected = self.bytes_to_receive();
        let policy = &self.scan_policy;
        let port = self
            .transport
            .as_deref_mut()
            .ok_or(GlazeError::NotConnected)?;
        let bytes = retry_async(policy, "read scan", port, |port| {
            Box::pin(async move {
                port.write(&[FETCH_COMMAND]).await?;
                let bytes = port.read(expected).await?;
                if bytes.len() != expected {
                    return Err(GlazeError::Transport(format!(
                        "received {} bytes, expected {expected}",
                        bytes.len()
                    )));
                }
                Ok(bytes)
            })
        })
        .await?;

        let n = self.scanning_list.len();
        let values = decode_f32_le(&bytes);
        Ok(RawScan {
            times: values[..n].to_vec(),
            xs: values[n..2 * n].to_vec(),
            ys: values[2 * n..3 * n].to_vec(),
        })
    }
}

#[async_trait]
impl ScanProtocol for CommandProtocol {
    fn protocol_version(&self) -> &'static str {
        "v1"
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(
            feature,
            "basic_scanning"
                | "settings_write"
                | "list_write"
                | "status_check"
                | "firmware_version"
                | "serial_number"
        )
    }

    #[instrument(skip(self))]
    async fn connect(&mut self) -> GlazeResult<()> {
        if self.transport.is_some() {
            warn!("Already connected to device");
            return Ok(());
        }
        self.transport = Some(open_transport(&self.config).await?);
        info!(port = %self.config.amp_port, "Connected with command protocol");
        Ok(())
    }

    async fn disconnect(&mut self) -> GlazeResult<()> {
        if let Some(mut port) = self.transport.take() {
            port.close().await?;
            debug!(port = %self.config.amp_port, "Disconnected");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn write_settings(&mut self) -> GlazeResult<String> {
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

        self.send_and_acknowledge(SEND_SETTINGS_COMMAND, true).await?;
        let mut payload = BytesMut::with_capacity(6);
        payload.put_u16_le(n_points);
        payload.put_u16_le(periods);
        payload.put_u16_le(u16::from(self.config.use_ema));
        self.port()?.write(&payload).await?;
        self.get_response(SEND_SETTINGS_COMMAND, true).await
    }

    #[instrument(skip(self))]
    async fn write_list(&mut self) -> GlazeResult<String> {
        debug!(points = self.scanning_list.len(), "Writing scan list");
        self.send_and_acknowledge(SEND_LIST_COMMAND, true).await?;
        let payload = encode_f32_le(&self.scanning_list);
        self.port()?.write(&payload).await?;
        self.get_response(SEND_LIST_COMMAND, true).await
    }

    async fn start_scan(&mut self) -> GlazeResult<PolarScan> {
        self.send_and_acknowledge(START_COMMAND, true).await?;
        self.await_scan_finished().await?;
        let raw = self.read_scan().await?;
        Ok(PolarScan::from(raw))
    }

    async fn get_status(&mut self) -> GlazeResult<String> {
        let response = self.send_and_acknowledge(STATUS_COMMAND, false).await?;
        match response.as_str() {
            STATUS_SCANNING | STATUS_IDLE => Ok(response),
            _ => Err(GlazeError::ProtocolFormat(format!(
                "Unknown status: {response}"
            ))),
        }
    }

    async fn fetch_data(&mut self) -> GlazeResult<RawScan> {
        self.read_scan().await
    }

    async fn get_serial_number(&mut self) -> GlazeResult<String> {
        Ok(PLACEHOLDER_SERIAL_NUMBER.to_string())
    }

    async fn get_firmware_version(&mut self) -> GlazeResult<String> {
        self.send_command(FIRMWARE_VERSION_COMMAND).await?;
        let bytes = self.port()?.read_until(LINE_DELIMITER).await?;
        Ok(String::from_utf8_lossy(&bytes).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_config(port: &str) -> DeviceConfiguration {
        let mut config = DeviceConfiguration::new(port, "mock_delay");
        config.n_points = 100;
        config.integration_periods = 1;
        config
    }

    #[tokio::test]
    async fn test_requires_connection() {
        let mut driver = CommandProtocol::new(mock_config("mock_device"));
        assert!(matches!(
            driver.get_status().await,
            Err(GlazeError::NotConnected)
        ));
        assert!(matches!(
            driver.write_settings().await,
            Err(GlazeError::NotConnected)
        ));
        // Disconnecting twice is fine.
        driver.disconnect().await.unwrap();
        driver.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_scan_against_mock() {
        let mut driver = CommandProtocol::new(mock_config("mock_device"));
        driver.connect().await.unwrap();
        assert_eq!(driver.write_settings().await.unwrap(), "ACK: Settings received.");
        assert_eq!(driver.write_list().await.unwrap(), "ACK: List received.");
        assert_eq!(driver.get_status().await.unwrap(), STATUS_IDLE);

        let scan = driver.start_scan().await.unwrap();
        assert_eq!(scan.times.len(), 100);
        assert_eq!(scan.radii.len(), 100);
        assert!(scan.angles.iter().all(|a| (0.0..=90.0).contains(a)));
        assert_eq!(driver.get_firmware_version().await.unwrap(), "v0.1.0");
        driver.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_responses_are_transport_faults() {
        let mut driver = CommandProtocol::new(mock_config("mock_device_empty_responses"));
        driver.connect().await.unwrap();
        let err = driver.write_settings().await.unwrap_err();
        assert!(err.is_transport_fault());
        assert_eq!(
            err.to_string(),
            "Transport error: Command: 'S'. Empty response received"
        );
    }

    #[tokio::test]
    async fn test_serial_number_is_placeholder() {
        let mut driver = CommandProtocol::new(mock_config("mock_device"));
        assert_eq!(driver.get_serial_number().await.unwrap(), "X-9999");
        assert!(driver.supports_feature("status_check"));
        assert!(!driver.supports_feature("structured_messages"));
    }
}
