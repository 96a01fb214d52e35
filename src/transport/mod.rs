//! Byte-stream transports to the scanner.
//!
//! Protocol drivers never talk to a port directly. They go through the [`Transport`]
//! trait, which mirrors the semantics of a serial port with a read timeout:
//!
//! - [`write`](Transport::write) sends all bytes.
//! - [`read`](Transport::read) returns up to `n` bytes, fewer when the timeout expires.
//! - [`read_until`](Transport::read_until) returns bytes up to and including the
//!   delimiter, or whatever arrived before the timeout.
//!
//! [`open_transport`] picks the implementation from the configured port name: names
//! containing `mock_device` get an in-process simulated device from [`crate::mock`],
//! everything else is opened as a serial port.

mod serial;

pub use serial::SerialTransport;

use crate::config::DeviceConfiguration;
use crate::error::GlazeResult;
use async_trait::async_trait;
use std::time::Duration;

/// Line delimiter of text responses.
pub const LINE_DELIMITER: u8 = b'\n';

/// Byte-oriented link to a scanner.
#[async_trait]
pub trait Transport: Send {
    /// Write all bytes to the device.
    async fn write(&mut self, bytes: &[u8]) -> GlazeResult<()>;

    /// Read up to `n` bytes. Returns fewer bytes when the read timeout expires.
    async fn read(&mut self, n: usize) -> GlazeResult<Vec<u8>>;

    /// Read until `delimiter` (inclusive) or until the read timeout expires.
    async fn read_until(&mut self, delimiter: u8) -> GlazeResult<Vec<u8>>;

    /// Close the link. Further I/O fails.
    async fn close(&mut self) -> GlazeResult<()>;

    /// Current read timeout.
    fn timeout(&self) -> Duration;

    /// Change the read timeout.
    fn set_timeout(&mut self, timeout: Duration);
}

/// Open the transport named by `config.amp_port`.
pub async fn open_transport(config: &DeviceConfiguration) -> GlazeResult<Box<dyn Transport>> {
    if config.is_mock() {
        return crate::mock::open_mock_device(config);
    }
    let port = SerialTransport::open(&config.amp_port, config.amp_baudrate, config.read_timeout()?)
        .await?;
    Ok(Box::new(port))
}
