//! # Glaze
//!
//! Driver and scan-streaming client for lock-in based terahertz time-domain
//! spectroscopy scanners on a serial link.
//!
//! ## Crate Structure
//!
//! - **`config`**: [`DeviceConfiguration`](config::DeviceConfiguration), scan interval
//!   handling and the derived scan point list.
//! - **`error`**: the crate-wide [`GlazeError`](error::GlazeError).
//! - **`error_recovery`**: bounded exponential backoff used by the drivers.
//! - **`logging`**: optional `tracing` subscriber setup.
//! - **`transport`**: the byte-stream [`Transport`](transport::Transport) trait and the
//!   serial implementation.
//! - **`protocol`**: the command-byte (`v1`) and header-framed (`v2`) drivers, the
//!   protocol registry, and version negotiation.
//! - **`mock`**: simulated devices selected by `mock_device*` port names.
//! - **`scanning`**: [`Scanner`](scanning::Scanner),
//!   [`AsyncScanner`](scanning::AsyncScanner) and [`GlazeClient`](scanning::GlazeClient).
//!
//! ## Example
//!
//! ```rust,no_run
//! use glaze::{DeviceConfiguration, GlazeClient};
//!
//! # #[tokio::main]
//! # async fn main() -> glaze::GlazeResult<()> {
//! let config = DeviceConfiguration::new("/dev/ttyACM0", "delay-01");
//! let mut client = GlazeClient::new(config);
//! client.open().await?;
//! let pulses = client.read(10).await;
//! client.close().await;
//! println!("read {} pulses", pulses?.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod error_recovery;
pub mod logging;
pub mod mock;
pub mod protocol;
pub mod scanning;
pub mod transport;

pub use config::DeviceConfiguration;
pub use error::{GlazeError, GlazeResult};
pub use protocol::ScanProtocol;
pub use scanning::{AsyncScanner, GlazeClient, Scanner, UnprocessedWaveform};
