//! Scanner wire protocols.
//!
//! All drivers implement [`ScanProtocol`], the capability set shared by every firmware
//! generation:
//!
//! - [`CommandProtocol`] (`"v1"`): single ASCII command bytes with line-terminated ACKs.
//! - [`FramedProtocol`] (`"v2"`): 8-byte framed headers with 16-bit instruction codes.
//! - [`crate::mock::MockProtocol`]: talks to the simulated command-protocol device
//!   directly, for tests.
//!
//! The [`registry`] maps `(device type, version)` pairs to driver constructors and
//! negotiates a working version against a connected device.

pub mod command;
pub mod frame;
pub mod framed;
pub mod registry;

pub use command::CommandProtocol;
pub use framed::FramedProtocol;
pub use registry::{
    detect_protocol_version, get_protocol, list_supported_versions, negotiate,
    register_protocol, ProtocolConstructor, ProtocolRegistry, SUPPORTED_VERSIONS,
};

use crate::error::GlazeResult;
use async_trait::async_trait;

/// Raw lock-in readout of one sweep.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawScan {
    /// Delay axis.
    pub times: Vec<f32>,
    /// In-phase (cosine) channel.
    pub xs: Vec<f32>,
    /// Quadrature (sine) channel.
    pub ys: Vec<f32>,
}

/// One sweep converted to polar form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolarScan {
    /// Delay axis.
    pub times: Vec<f64>,
    /// `sqrt(X^2 + Y^2)` per point.
    pub radii: Vec<f64>,
    /// `atan2(Y, X)` per point, in degrees.
    pub angles: Vec<f64>,
}

impl From<RawScan> for PolarScan {
    fn from(raw: RawScan) -> Self {
        let (radii, angles) = raw
            .xs
            .iter()
            .zip(&raw.ys)
            .map(|(&x, &y)| {
                let (x, y) = (f64::from(x), f64::from(y));
                (x.hypot(y), y.atan2(x).to_degrees())
            })
            .unzip();
        Self {
            times: raw.times.iter().map(|&t| f64::from(t)).collect(),
            radii,
            angles,
        }
    }
}

/// Capability set of a scanner protocol driver.
///
/// Drivers are used from a single task at a time; every I/O method takes `&mut self`.
#[async_trait]
pub trait ScanProtocol: Send {
    /// Version tag of this driver (e.g. `"v1"`).
    fn protocol_version(&self) -> &'static str;

    /// Whether this protocol generation offers the named feature.
    fn supports_feature(&self, feature: &str) -> bool;

    /// Open the link to the device.
    async fn connect(&mut self) -> GlazeResult<()>;

    /// Close the link. Idempotent.
    async fn disconnect(&mut self) -> GlazeResult<()>;

    /// Send scan settings. Returns the device acknowledgement or a description.
    async fn write_settings(&mut self) -> GlazeResult<String>;

    /// Send the scan point list.
    async fn write_list(&mut self) -> GlazeResult<String>;

    /// Run one sweep and return it in polar form.
    async fn start_scan(&mut self) -> GlazeResult<PolarScan>;

    /// Query the device status.
    async fn get_status(&mut self) -> GlazeResult<String>;

    /// Read the data of the last sweep.
    async fn fetch_data(&mut self) -> GlazeResult<RawScan>;

    /// Device serial number.
    async fn get_serial_number(&mut self) -> GlazeResult<String>;

    /// Device firmware version.
    async fn get_firmware_version(&mut self) -> GlazeResult<String>;

    /// Cheap call that only succeeds when the device speaks this protocol.
    ///
    /// Used by negotiation after a successful `connect()`.
    async fn verify(&mut self) -> GlazeResult<()> {
        self.get_status().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polar_conversion_in_degrees() {
        let raw = RawScan {
            times: vec![0.0, 1.0, 2.0],
            xs: vec![1.0, 0.0, -3.0],
            ys: vec![0.0, 2.0, 4.0],
        };
        let polar = PolarScan::from(raw);
        assert_eq!(polar.radii, vec![1.0, 2.0, 5.0]);
        assert!((polar.angles[0] - 0.0).abs() < 1e-9);
        assert!((polar.angles[1] - 90.0).abs() < 1e-9);
        assert!((polar.angles[2] - 126.869_897_645_844).abs() < 1e-6);
    }
}
