//! Header-framed protocol ("v2").
//!
//! Every request and response is a frame as described in [`super::frame`]. Settings,
//! the scan list, and the scan trigger are not acknowledged by the device; data,
//! ping, and memory requests each produce framed responses.

use super::frame::{decode_f32_le, encode_f32_le, encode_frame, instruction, parse_header, HEADER_SIZE};
use super::{PolarScan, RawScan, ScanProtocol};
use crate::config::{scanning_list, DeviceConfiguration};
use crate::error::{GlazeError, GlazeResult};
use crate::transport::{open_transport, Transport};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

/// Timeout of a single framed response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(150);

const FIRMWARE_VERSION: &str = "UART-OS V0.1";

/// Driver for the header-framed protocol.
pub struct FramedProtocol {
    config: DeviceConfiguration,
    scanning_list: Vec<f32>,
    transport: Option<Box<dyn Transport>>,
}

impl FramedProtocol {
    /// Creates a disconnected driver.
    pub fn new(config: DeviceConfiguration) -> Self {
        Self {
            scanning_list: scanning_list(&config),
            config,
            transport: None,
        }
    }

    /// Creates a driver bound to an already open transport. No ping is sent.
    pub fn with_transport(config: DeviceConfiguration, transport: Box<dyn Transport>) -> Self {
        let mut driver = Self::new(config);
        driver.transport = Some(transport);
        driver
    }

    /// Constructor registered under `"v2"`.
    pub fn boxed(config: DeviceConfiguration) -> Box<dyn ScanProtocol> {
        Box::new(Self::new(config))
    }

    /// Delay positions written to the device.
    pub fn scanning_list(&self) -> &[f32] {
        &self.scanning_list
    }

    fn port(&mut self) -> GlazeResult<&mut dyn Transport> {
        match self.transport.as_deref_mut() {
            Some(port) => Ok(port),
            None => Err(GlazeError::NotConnected),
        }
    }

    async fn send_message(&mut self, instr: u16, payload: &[u8]) -> GlazeResult<()> {
        let frame = encode_frame(instr, payload)?;
        trace!(instruction = format_args!("{instr:#06x}"), len = payload.len(), "send frame");
        self.port()?.write(&frame).await
    }

    /// Receives one frame with the given timeout, restoring the link timeout afterwards.
    async fn receive_message(&mut self, timeout: Duration) -> GlazeResult<(u16, Vec<u8>)> {
        let port = self.port()?;
        let previous = port.timeout();
        port.set_timeout(timeout);
        let result = read_frame(port).await;
        port.set_timeout(previous);
        result
    }

    async fn expect_message(&mut self, expected: u16, timeout: Duration, context: &str) -> GlazeResult<Vec<u8>> {
        let (instr, payload) = self.receive_message(timeout).await?;
        if instr != expected {
            return Err(GlazeError::ProtocolFormat(format!(
                "{context}: expected {expected:#06x}, got {instr:#06x}"
            )));
        }
        Ok(payload)
    }

    /// Sends an empty PING and waits for the echo.
    pub async fn ping(&mut self) -> GlazeResult<()> {
        self.send_message(instruction::SYS_PING, &[]).await?;
        self.expect_message(instruction::SYS_PING, RESPONSE_TIMEOUT, "Ping response")
            .await?;
        Ok(())
    }

    async fn close_transport(&mut self) {
        if let Some(mut port) = self.transport.take() {
            if let Err(err) = port.close().await {
                warn!(error = %err, "Failed to close transport");
            }
        }
    }
}

async fn read_frame(port: &mut dyn Transport) -> GlazeResult<(u16, Vec<u8>)> {
    let header = port.read(HEADER_SIZE).await?;
    if header.len() != HEADER_SIZE {
        return Err(GlazeError::Transport(format!(
            "Failed to read complete header: expected {HEADER_SIZE} bytes, got {}",
            header.len()
        )));
    }
    let header = parse_header(&header)?;
    let size = usize::from(header.payload_size);
    let payload = if size > 0 {
        port.read(size).await?
    } else {
        Vec::new()
    };

    if header.instruction == instruction::ERROR {
        return Err(GlazeError::Device(
            String::from_utf8_lossy(&payload).into_owned(),
        ));
    }
    if payload.len() != size {
        return Err(GlazeError::Transport(format!(
            "Failed to read complete payload: expected {size} bytes, got {}",
            payload.len()
        )));
    }
    Ok((header.instruction, payload))
}

#[async_trait]
impl ScanProtocol for FramedProtocol {
    fn protocol_version(&self) -> &'static str {
        "v2"
    }

    fn supports_feature(&self, feature: &str) -> bool {
        matches!(
            feature,
            "header_based_protocol"
                | "structured_messages"
                | "16bit_instructions"
                | "amplitude_control"
                | "system_diagnostics"
                | "real_time_data"
        )
    }

    #[instrument(skip(self))]
    async fn connect(&mut self) -> GlazeResult<()> {
        if self.transport.is_some() {
            warn!("Already connected to device");
            return Ok(());
        }
        self.transport = Some(open_transport(&self.config).await?);
        if let Err(err) = self.ping().await {
            self.close_transport().await;
            return Err(GlazeError::Communication(format!(
                "Failed to connect to device: {err}"
            )));
        }
        info!(port = %self.config.amp_port, "Connected with framed protocol");
        Ok(())
    }

    async fn disconnect(&mut self) -> GlazeResult<()> {
        if let Some(mut port) = self.transport.take() {
            port.close().await?;
            debug!(port = %self.config.amp_port, "Disconnected");
        }
        Ok(())
    }

    async fn write_settings(&mut self) -> GlazeResult<String> {
        let periods = u16::try_from(self.config.integration_periods).map_err(|_| {
            GlazeError::Configuration(format!(
                "integration_periods {} does not fit the settings frame",
                self.config.integration_periods
            ))
        })?;
        self.send_message(instruction::RECEIVER_SET_FILTER_CALLS, &periods.to_le_bytes())
            .await?;
        Ok(format!("Settings written: integration_periods={periods}"))
    }

    async fn write_list(&mut self) -> GlazeResult<String> {
        let payload = encode_f32_le(&self.scanning_list);
        self.send_message(instruction::DRIVER_SET, &payload).await?;
        Ok(format!(
            "Scanning list written: {} points",
            self.scanning_list.len()
        ))
    }

    async fn start_scan(&mut self) -> GlazeResult<PolarScan> {
        self.send_message(instruction::MANAGER_CALL, &[]).await?;
        let raw = self.fetch_data().await?;
        Ok(PolarScan::from(raw))
    }

    async fn get_status(&mut self) -> GlazeResult<String> {
        match self.ping().await {
            Ok(()) => Ok("IDLE".to_string()),
            Err(err) => {
                debug!(error = %err, "Status ping failed");
                Ok("UNKNOWN".to_string())
            }
        }
    }

    async fn fetch_data(&mut self) -> GlazeResult<RawScan> {
        self.send_message(instruction::MANAGER_DATA, &[]).await?;
        let timeout = self.config.sweep_length() + RESPONSE_TIMEOUT;
        let cos = self
            .expect_message(instruction::MANAGER_DATA, timeout, "Cosine data")
            .await?;
        let sin = self
            .expect_message(instruction::MANAGER_DATA, timeout, "Sine data")
            .await?;

        let (xs, ys) = (decode_samples(&cos, "cos")?, decode_samples(&sin, "sin")?);
        if xs.len() != ys.len() {
            return Err(GlazeError::ProtocolFormat(format!(
                "Mismatched array sizes: cos={}, sin={}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() != self.scanning_list.len() {
            return Err(GlazeError::ProtocolFormat(format!(
                "Unexpected data size: expected {} points, got {}",
                self.scanning_list.len(),
                xs.len()
            )));
        }
        Ok(RawScan {
            times: self.scanning_list.clone(),
            xs,
            ys,
        })
    }

    async fn get_serial_number(&mut self) -> GlazeResult<String> {
        self.send_message(instruction::MEMORY_SEND, &[]).await?;
        let payload = self
            .expect_message(instruction::MEMORY_SEND, RESPONSE_TIMEOUT, "Serial number")
            .await?;
        let text = String::from_utf8_lossy(&payload);
        Ok(text.trim_end_matches('\0').to_string())
    }

    async fn get_firmware_version(&mut self) -> GlazeResult<String> {
        Ok(FIRMWARE_VERSION.to_string())
    }

    async fn verify(&mut self) -> GlazeResult<()> {
        self.ping().await
    }
}

/// Decodes a data payload of little-endian `f32` samples.
fn decode_samples(payload: &[u8], name: &str) -> GlazeResult<Vec<f32>> {
    if payload.len() % 4 != 0 {
        return Err(GlazeError::ProtocolFormat(format!(
            "Truncated {name} data: {} bytes is not a whole number of samples",
            payload.len()
        )));
    }
    Ok(decode_f32_le(payload))
}
