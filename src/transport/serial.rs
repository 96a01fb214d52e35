//! Serial port transport built on `tokio-serial`.
//!
//! The port is opened 8N1 without flow control on a blocking thread. Reads are bounded
//! by the configured read timeout and return short instead of failing, matching the
//! behavior drivers expect from a serial port.

use super::Transport;
use crate::error::{GlazeError, GlazeResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "tokio_serial")]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(feature = "tokio_serial")]
use tokio::time::{timeout, Instant};

const READ_CHUNK: usize = 256;

/// Serial link to a physical scanner.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,
    /// Read timeout applied to every read call
    timeout: Duration,
    /// Bytes received past the last delimiter
    pending: VecDeque<u8>,
    #[cfg(feature = "tokio_serial")]
    port: Option<tokio_serial::SerialStream>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_name", &self.port_name)
            .field("timeout", &self.timeout)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate`.
    ///
    /// Failing to open the port is a transport fault.
    #[cfg(feature = "tokio_serial")]
    pub async fn open(port_name: &str, baud_rate: u32, read_timeout: Duration) -> GlazeResult<Self> {
        use tokio::task::spawn_blocking;
        use tokio_serial::SerialPortBuilderExt;

        let path = port_name.to_string();
        let stream = spawn_blocking(move || {
            tokio_serial::new(&path, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|e| GlazeError::Transport(format!("could not open port {path}: {e}")))
        })
        .await
        .map_err(|e| GlazeError::Transport(format!("serial open task failed: {e}")))??;

        debug!(port = port_name, baud_rate, "Opened serial port");
        Ok(Self {
            port_name: port_name.to_string(),
            timeout: read_timeout,
            pending: VecDeque::new(),
            port: Some(stream),
        })
    }

    /// Serial support is compiled out; every physical port is unavailable.
    #[cfg(not(feature = "tokio_serial"))]
    pub async fn open(
        _port_name: &str,
        _baud_rate: u32,
        _read_timeout: Duration,
    ) -> GlazeResult<Self> {
        Err(GlazeError::SerialFeatureDisabled)
    }

    /// Name of the underlying port.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn take_pending(&mut self, n: usize) -> Vec<u8> {
        let take = n.min(self.pending.len());
        self.pending.drain(..take).collect()
    }

    fn take_line(&mut self, delimiter: u8) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == delimiter)?;
        Some(self.pending.drain(..=end).collect())
    }

    /// Read one chunk into `pending`. Returns false on timeout or end of stream.
    #[cfg(feature = "tokio_serial")]
    async fn fill(&mut self, max: usize, deadline: Instant) -> GlazeResult<bool> {
        let port = self.port.as_mut().ok_or(GlazeError::NotConnected)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        let mut chunk = vec![0u8; max.clamp(1, READ_CHUNK)];
        match timeout(remaining, port.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => Ok(false),
            Ok(Ok(n)) => {
                self.pending.extend(&chunk[..n]);
                Ok(true)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    #[cfg(feature = "tokio_serial")]
    fn release_port(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "Closed serial port");
        }
    }

    #[cfg(not(feature = "tokio_serial"))]
    fn release_port(&mut self) {}

    #[cfg(not(feature = "tokio_serial"))]
    async fn fill(&mut self, _max: usize, _deadline: tokio::time::Instant) -> GlazeResult<bool> {
        Err(GlazeError::SerialFeatureDisabled)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    #[cfg(feature = "tokio_serial")]
    async fn write(&mut self, bytes: &[u8]) -> GlazeResult<()> {
        let port = self.port.as_mut().ok_or(GlazeError::NotConnected)?;
        port.write_all(bytes).await?;
        port.flush().await?;
        Ok(())
    }

    #[cfg(not(feature = "tokio_serial"))]
    async fn write(&mut self, _bytes: &[u8]) -> GlazeResult<()> {
        Err(GlazeError::SerialFeatureDisabled)
    }

    async fn read(&mut self, n: usize) -> GlazeResult<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        while self.pending.len() < n {
            if !self.fill(n - self.pending.len(), deadline).await? {
                break;
            }
        }
        Ok(self.take_pending(n))
    }

    async fn read_until(&mut self, delimiter: u8) -> GlazeResult<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if let Some(line) = self.take_line(delimiter) {
                return Ok(line);
            }
            if !self.fill(READ_CHUNK, deadline).await? {
                let len = self.pending.len();
                return Ok(self.take_pending(len));
            }
        }
    }

    async fn close(&mut self) -> GlazeResult<()> {
        self.pending.clear();
        self.release_port();
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

#[cfg(all(test, feature = "tokio_serial"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_missing_port_is_transport_fault() {
        let err = SerialTransport::open("/dev/glaze-does-not-exist", 115_200, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.is_transport_fault(), "unexpected error: {err}");
    }
}
