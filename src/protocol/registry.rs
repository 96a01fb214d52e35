//! Protocol registry and version negotiation.
//!
//! Scanner firmware generations speak different wire protocols. The registry maps a
//! device type tag (`"Le"`) to its protocol versions, and [`negotiate`] finds the
//! newest version the connected device answers to:
//!
//! ```text
//! for version in ["v2", "v1"] (registered ones only):
//!     connect + verify  ──ok──▶ return the connected driver
//!         │
//!         ├─ link fault ──────▶ abort, propagate the fault
//!         └─ other failure ──▶ disconnect, try the next version
//! all failed ──────────────────▶ GlazeError::Negotiation
//! ```
//!
//! Versions registered outside the preference list are tried last, in registration
//! order.

use super::{CommandProtocol, FramedProtocol, ScanProtocol};
use crate::config::DeviceConfiguration;
use crate::error::{GlazeError, GlazeResult};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Protocol versions in preference order, newest first.
pub const SUPPORTED_VERSIONS: [&str; 2] = ["v2", "v1"];

/// Builds a disconnected driver for a configuration.
pub type ProtocolConstructor = fn(DeviceConfiguration) -> Box<dyn ScanProtocol>;

static REGISTRY: Lazy<RwLock<ProtocolRegistry>> = Lazy::new(|| RwLock::new(ProtocolRegistry::default()));

// =============================================================================
// Registry
// =============================================================================

/// Device type → version → constructor, in registration order.
#[derive(Clone)]
pub struct ProtocolRegistry {
    device_types: Vec<(String, Vec<(String, ProtocolConstructor)>)>,
}

impl Default for ProtocolRegistry {
    /// Registry with the `"Le"` command (`v1`) and framed (`v2`) protocols.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(DeviceConfiguration::DEVICE_TYPE, "v1", CommandProtocol::boxed);
        registry.register(DeviceConfiguration::DEVICE_TYPE, "v2", FramedProtocol::boxed);
        registry
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.device_types
                    .iter()
                    .map(|(device_type, versions)| {
                        (device_type, versions.iter().map(|(v, _)| v).collect::<Vec<_>>())
                    }),
            )
            .finish()
    }
}

impl ProtocolRegistry {
    /// Registry without any protocols.
    pub fn empty() -> Self {
        Self {
            device_types: Vec::new(),
        }
    }

    /// Add or replace the constructor for `(device_type, version)`.
    pub fn register(&mut self, device_type: &str, version: &str, constructor: ProtocolConstructor) {
        let versions = match self
            .device_types
            .iter_mut()
            .position(|(name, _)| name == device_type)
        {
            Some(index) => &mut self.device_types[index].1,
            None => {
                self.device_types.push((device_type.to_string(), Vec::new()));
                let last = self.device_types.len() - 1;
                &mut self.device_types[last].1
            }
        };
        match versions.iter_mut().find(|(v, _)| v == version) {
            Some(entry) => entry.1 = constructor,
            None => versions.push((version.to_string(), constructor)),
        }
    }

    fn versions_of(&self, device_type: &str) -> &[(String, ProtocolConstructor)] {
        self.device_types
            .iter()
            .find(|(name, _)| name == device_type)
            .map(|(_, versions)| versions.as_slice())
            .unwrap_or(&[])
    }

    /// Constructor registered for `(device_type, version)`.
    pub fn constructor(&self, device_type: &str, version: &str) -> Option<ProtocolConstructor> {
        self.versions_of(device_type)
            .iter()
            .find(|(v, _)| v == version)
            .map(|(_, constructor)| *constructor)
    }

    /// Registered versions per device type.
    pub fn supported_versions(&self) -> HashMap<String, Vec<String>> {
        self.device_types
            .iter()
            .map(|(device_type, versions)| {
                (
                    device_type.clone(),
                    versions.iter().map(|(v, _)| v.clone()).collect(),
                )
            })
            .collect()
    }

    /// Registered versions of `device_type` in the order negotiation tries them.
    pub fn negotiation_order(&self, device_type: &str) -> Vec<(String, ProtocolConstructor)> {
        let registered = self.versions_of(device_type);
        let preferred = SUPPORTED_VERSIONS
            .iter()
            .filter_map(|version| registered.iter().find(|(v, _)| v == version));
        let others = registered
            .iter()
            .filter(|(v, _)| !SUPPORTED_VERSIONS.contains(&v.as_str()));
        preferred.chain(others).cloned().collect()
    }

    /// Construct the driver for an explicit version without connecting.
    pub fn build(
        &self,
        device_type: &str,
        version: &str,
        config: DeviceConfiguration,
    ) -> GlazeResult<Box<dyn ScanProtocol>> {
        match self.constructor(device_type, version) {
            Some(constructor) => Ok(constructor(config)),
            None => Err(GlazeError::Configuration(format!(
                "{device_type} protocol version '{version}' not supported. Available: {:?}",
                self.versions_of(device_type)
                    .iter()
                    .map(|(v, _)| v.as_str())
                    .collect::<Vec<_>>()
            ))),
        }
    }

    /// Connect with the newest version of `device_type` the device answers to.
    #[instrument(skip(self, config))]
    pub async fn negotiate(
        &self,
        device_type: &str,
        config: &DeviceConfiguration,
    ) -> GlazeResult<Box<dyn ScanProtocol>> {
        let candidates = self.negotiation_order(device_type);
        if candidates.is_empty() {
            return Err(GlazeError::Configuration(format!(
                "No {device_type} protocol implementations registered"
            )));
        }

        let mut tried = Vec::with_capacity(candidates.len());
        let mut last_error = String::new();
        for (version, constructor) in candidates {
            debug!(%version, "Attempting protocol negotiation");
            tried.push(version.clone());
            let mut driver = constructor(config.clone());
            match connect_and_verify(driver.as_mut()).await {
                Ok(()) => {
                    info!(%version, "Negotiated protocol version");
                    return Ok(driver);
                }
                Err(err) => {
                    if let Err(close_err) = driver.disconnect().await {
                        debug!(%version, error = %close_err, "Disconnect after failed attempt");
                    }
                    if err.is_transport_fault() {
                        return Err(err);
                    }
                    debug!(%version, error = %err, "Protocol version failed during negotiation");
                    last_error = format!("Version {version} failed: {err}");
                }
            }
        }
        Err(GlazeError::Negotiation {
            device_type: device_type.to_string(),
            tried,
            last_error,
        })
    }
}

async fn connect_and_verify(driver: &mut dyn ScanProtocol) -> GlazeResult<()> {
    driver.connect().await?;
    driver.verify().await
}

// =============================================================================
// Process-wide registry
// =============================================================================

/// Add or replace a protocol in the process-wide registry.
pub fn register_protocol(device_type: &str, version: &str, constructor: ProtocolConstructor) {
    REGISTRY.write().register(device_type, version, constructor);
}

/// Registered versions per device type in the process-wide registry.
pub fn list_supported_versions() -> HashMap<String, Vec<String>> {
    REGISTRY.read().supported_versions()
}

/// Driver for the scanner described by `config`.
///
/// With an explicit `version` the driver is constructed disconnected. Without one,
/// versions are negotiated and the returned driver is already connected.
pub async fn get_protocol(
    config: &DeviceConfiguration,
    version: Option<&str>,
) -> GlazeResult<Box<dyn ScanProtocol>> {
    // The guard must not live across an await point.
    let registry = REGISTRY.read().clone();
    match version {
        Some(version) => registry.build(DeviceConfiguration::DEVICE_TYPE, version, config.clone()),
        None => {
            registry
                .negotiate(DeviceConfiguration::DEVICE_TYPE, config)
                .await
        }
    }
}

/// Negotiate a connected driver for `config`.
pub async fn negotiate(config: &DeviceConfiguration) -> GlazeResult<Box<dyn ScanProtocol>> {
    get_protocol(config, None).await
}

/// Version tag the device at `config.amp_port` speaks. The link is closed afterwards.
pub async fn detect_protocol_version(config: &DeviceConfiguration) -> GlazeResult<String> {
    let mut driver = negotiate(config).await?;
    let version = driver.protocol_version().to_string();
    if let Err(err) = driver.disconnect().await {
        debug!(error = %err, "Disconnect after version detection failed");
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProtocol;

    fn config(port: &str) -> DeviceConfiguration {
        let mut config = DeviceConfiguration::new(port, "mock_delay");
        config.n_points = 50;
        config.integration_periods = 1;
        config
    }

    #[test]
    fn test_default_order_prefers_newest() {
        let registry = ProtocolRegistry::default();
        let order: Vec<String> = registry
            .negotiation_order("Le")
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        assert_eq!(order, vec!["v2", "v1"]);
    }

    #[test]
    fn test_unlisted_versions_are_tried_last() {
        let mut registry = ProtocolRegistry::default();
        registry.register("Le", "v3", FramedProtocol::boxed);
        let order: Vec<String> = registry
            .negotiation_order("Le")
            .into_iter()
            .map(|(v, _)| v)
            .collect();
        assert_eq!(order, vec!["v2", "v1", "v3"]);
    }

    #[test]
    fn test_unknown_version_is_configuration_error() {
        let registry = ProtocolRegistry::default();
        let err = registry.build("Le", "v9", config("mock_device")).err();
        assert!(matches!(err, Some(GlazeError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_negotiates_custom_device_type() {
        let mut registry = ProtocolRegistry::empty();
        registry.register("LeMock", "v1", MockProtocol::boxed);
        let mut driver = registry
            .negotiate("LeMock", &config("mock_device"))
            .await
            .unwrap();
        assert_eq!(driver.protocol_version(), "v1");
        assert_eq!(driver.get_serial_number().await.unwrap(), "M-9999");
    }

    #[tokio::test]
    async fn test_empty_registry_fails() {
        let registry = ProtocolRegistry::empty();
        assert!(matches!(
            registry.negotiate("Le", &config("mock_device")).await,
            Err(GlazeError::Configuration(_))
        ));
    }
}
