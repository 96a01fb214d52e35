//! Shared helpers for the integration tests.

#![allow(dead_code)]

use glaze::config::DeviceConfiguration;

/// Port name that no system provides.
pub const MISSING_PORT: &str = "/dev/glaze_port_that_does_not_exist";

/// A 100-point, single-period configuration: every sweep takes 10 ms.
pub fn mock_config(port: &str) -> DeviceConfiguration {
    let mut config = DeviceConfiguration::new(port, "mock_delay");
    config.n_points = 100;
    config.integration_periods = 1;
    config.amp_timeout_seconds = 7.0;
    config
}
