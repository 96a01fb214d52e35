//! In-process simulated scanners.
//!
//! Ports whose name contains `mock_device` are served by one of these devices instead
//! of a serial port. Both implement [`Transport`] and speak the same byte-level
//! contract as real hardware, so the protocol drivers cannot tell them apart.
//!
//! | Port name                          | Device                 | Behavior                     |
//! |------------------------------------|------------------------|------------------------------|
//! | `mock_device`                      | [`CommandMockDevice`]  | healthy                      |
//! | `mock_device_instant`              | [`CommandMockDevice`]  | sweeps finish immediately    |
//! | `mock_device_scan_should_fail`     | [`CommandMockDevice`]  | every scan read is empty     |
//! | `mock_device_fail_first_scan`      | [`CommandMockDevice`]  | first scan read is empty     |
//! | `mock_device_empty_responses`      | [`CommandMockDevice`]  | every read is empty          |
//! | `mock_device_v2*`                  | [`FramedMockDevice`]   | same variants, framed        |

mod command_device;
mod framed_device;
mod protocol;

pub use command_device::CommandMockDevice;
pub use framed_device::FramedMockDevice;
pub use protocol::MockProtocol;

use crate::config::DeviceConfiguration;
use crate::error::{GlazeError, GlazeResult};
use crate::transport::Transport;

/// Time window the simulated delay line spans, in seconds.
pub(crate) const TIME_WINDOW: f64 = 100e-12;

/// Serial number reported by every simulated device.
pub const MOCK_SERIAL_NUMBER: &str = "M-9999";

/// Failure injection settings of a simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MockBehavior {
    /// Scan reads after this many successful ones start failing. `None` never fails.
    pub fail_after: Option<u32>,
    /// How many scan reads fail once failing starts. `None` fails forever.
    pub n_fails: Option<u32>,
    /// Every read returns zero bytes.
    pub empty_responses: bool,
    /// Sweeps complete immediately.
    pub instant_response: bool,
}

impl MockBehavior {
    fn for_variant(variant: &str) -> Option<Self> {
        let behavior = match variant {
            "" => Self::default(),
            "_instant" => Self {
                instant_response: true,
                ..Self::default()
            },
            "_scan_should_fail" => Self {
                fail_after: Some(0),
                ..Self::default()
            },
            "_fail_first_scan" => Self {
                fail_after: Some(0),
                n_fails: Some(1),
                ..Self::default()
            },
            "_empty_responses" => Self {
                empty_responses: true,
                ..Self::default()
            },
            _ => return None,
        };
        Some(behavior)
    }
}

/// Tracks scan reads and decides which ones fail.
#[derive(Debug, Clone, Default)]
pub(crate) struct FailureInjector {
    behavior: MockBehavior,
    n_scans: u32,
    n_failures: u32,
}

impl FailureInjector {
    pub(crate) fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    /// Registers one scan read and reports whether it must fail.
    pub(crate) fn next_scan_fails(&mut self) -> bool {
        self.n_scans += 1;
        let failing = self
            .behavior
            .fail_after
            .is_some_and(|after| self.n_scans > after);
        let budget_left = self
            .behavior
            .n_fails
            .map_or(true, |wanted| self.n_failures < wanted);
        if failing && budget_left {
            self.n_failures += 1;
            true
        } else {
            false
        }
    }
}

/// Names of every available simulated device.
pub fn list_mock_devices() -> Vec<String> {
    const VARIANTS: [&str; 5] = [
        "",
        "_scan_should_fail",
        "_fail_first_scan",
        "_empty_responses",
        "_instant",
    ];
    ["mock_device", "mock_device_v2"]
        .iter()
        .flat_map(|base| VARIANTS.iter().map(move |variant| format!("{base}{variant}")))
        .collect()
}

/// Open the simulated device named by `config.amp_port`.
pub fn open_mock_device(config: &DeviceConfiguration) -> GlazeResult<Box<dyn Transport>> {
    let port = config.amp_port.as_str();
    if let Some(variant) = port.strip_prefix("mock_device_v2") {
        if let Some(behavior) = MockBehavior::for_variant(variant) {
            return Ok(Box::new(FramedMockDevice::new(behavior, config.read_timeout()?)));
        }
    } else if let Some(variant) = port.strip_prefix("mock_device") {
        if let Some(behavior) = MockBehavior::for_variant(variant) {
            return Ok(Box::new(CommandMockDevice::new(behavior, config.read_timeout()?)));
        }
    }
    Err(unknown_mock(port))
}

pub(crate) fn unknown_mock(port: &str) -> GlazeError {
    GlazeError::Configuration(format!(
        "Unknown mock device requested: {port}. Valid options are: {:?}",
        list_mock_devices()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_first_scan_fails_once() {
        let mut injector = FailureInjector::new(MockBehavior::for_variant("_fail_first_scan").unwrap());
        assert!(injector.next_scan_fails());
        assert!(!injector.next_scan_fails());
        assert!(!injector.next_scan_fails());
    }

    #[test]
    fn test_scan_should_fail_always_fails() {
        let mut injector = FailureInjector::new(MockBehavior::for_variant("_scan_should_fail").unwrap());
        assert!((0..10).all(|_| injector.next_scan_fails()));
    }

    #[test]
    fn test_healthy_device_never_fails() {
        let mut injector = FailureInjector::new(MockBehavior::default());
        assert!((0..10).all(|_| !injector.next_scan_fails()));
    }

    #[test]
    fn test_unknown_mock_name_is_configuration_error() {
        let config = DeviceConfiguration::new("mock_device_bogus", "mock_delay");
        assert!(matches!(
            open_mock_device(&config),
            Err(GlazeError::Configuration(_))
        ));
        assert_eq!(list_mock_devices().len(), 10);
        assert!(list_mock_devices().contains(&"mock_device_v2_fail_first_scan".to_string()));
    }
}
