//! Custom error types for the scanner driver.
//!
//! This module defines the primary error type, `GlazeError`, shared by every layer of
//! the crate: transports, protocol drivers, the negotiator, the scanner, and the
//! background scan worker.
//!
//! ## Error Hierarchy
//!
//! - **`Transport`**, **`Io`**: the byte link failed. Port open failures,
//!   short reads, and empty responses land here. These are retried a bounded number of
//!   times where they occur and escalate unchanged afterwards.
//! - **`Communication`**: the device answered, but not with what the command expects
//!   (for example an ACK line with the wrong prefix, or a failed ping).
//! - **`ProtocolFormat`**: a framed header or payload did not match the wire format.
//!   Never retried; it indicates a firmware or version mismatch.
//! - **`Device`**: the device reported an error payload. Surfaced verbatim.
//! - **`Negotiation`**: no registered protocol version could talk to the device.
//! - **`StartupTimeout`**, **`ScanTimeout`**, **`WorkerFatal`**, **`NotScanning`**:
//!   lifecycle failures of the background scan worker.
//! - **`Configuration`**, **`Config`**, **`Json`**: invalid or unreadable configuration.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type GlazeResult<T> = std::result::Result<T, GlazeError>;

/// Primary error type for the scanner driver.
///
/// # Error Categories
///
/// 1. **Link faults** - `Transport`, `Io`, `SerialFeatureDisabled`
///    - Retried locally with backoff inside the drivers
///    - Abort protocol negotiation immediately
///
/// 2. **Protocol faults** - `Communication`, `ProtocolFormat`, `Device`, `Negotiation`
///    - `Communication` is re-read a bounded number of times
///    - `ProtocolFormat` and `Device` escalate immediately
///
/// 3. **Worker lifecycle** - `StartupTimeout`, `ScanTimeout`, `WorkerFatal`, `NotScanning`
///    - Reported to the owner of the `AsyncScanner` handle
///
/// # Example
///
/// ```rust
/// use glaze::error::GlazeError;
///
/// let err = GlazeError::WorkerFatal(Box::new(GlazeError::Transport("short read".into())));
/// assert!(err.is_transport_fault());
/// assert!(!err.is_retryable());
/// ```
#[derive(Error, Debug)]
pub enum GlazeError {
    /// The byte link to the device failed.
    ///
    /// Raised for port open failures, empty responses, and short reads. Drivers retry
    /// these locally before letting them escalate.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Standard I/O error from the underlying port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A physical serial port was requested but serial support was not compiled in.
    ///
    /// Enable the `tokio_serial` feature or use a `mock_device*` port.
    #[error("Serial support is disabled. Rebuild with --features tokio_serial")]
    SerialFeatureDisabled,

    /// The device answered with an unexpected response.
    #[error("Device communication error: {0}")]
    Communication(String),

    /// A framed message violated the wire format.
    ///
    /// Header marker, reserved byte, version, instruction code, or array length
    /// mismatches. Never retried.
    #[error("Protocol error: {0}")]
    ProtocolFormat(String),

    /// The device reported an error payload.
    #[error("Device error: {0}")]
    Device(String),

    /// Every candidate protocol version failed to connect and verify.
    #[error("{device_type} protocol negotiation failed for all versions {tried:?}. Last error: {last_error}")]
    Negotiation {
        /// Device type tag the negotiation ran for.
        device_type: String,
        /// Versions that were attempted, in preference order.
        tried: Vec<String>,
        /// Description of the last failure.
        last_error: String,
    },

    /// The driver was used before `connect()` or after `disconnect()`.
    #[error("Device not connected. Call connect() first.")]
    NotConnected,

    /// The scan worker did not report its health within the startup timeout.
    #[error("Scanner timed out during startup")]
    StartupTimeout,

    /// No scan arrived from the worker within the scan timeout.
    #[error("Timed out waiting for a scan")]
    ScanTimeout,

    /// The scan worker stopped because of an unrecoverable failure.
    #[error("Scan worker failed: {0}")]
    WorkerFatal(Box<GlazeError>),

    /// An operation that needs a running worker was called while not scanning.
    #[error("Scanner is not running")]
    NotScanning,

    /// Semantically invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration file could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    /// JSON (de)serialization failure while saving or loading a configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<figment::Error> for GlazeError {
    fn from(err: figment::Error) -> Self {
        GlazeError::Config(Box::new(err))
    }
}

impl GlazeError {
    /// Returns true when this error, or the cause carried by a `WorkerFatal`, is a link fault.
    pub fn is_transport_fault(&self) -> bool {
        match self {
            GlazeError::Transport(_) | GlazeError::Io(_) | GlazeError::SerialFeatureDisabled => {
                true
            }
            GlazeError::WorkerFatal(cause) => cause.is_transport_fault(),
            _ => false,
        }
    }

    /// Returns true when re-reading from the device may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GlazeError::Transport(_) | GlazeError::Io(_) | GlazeError::Communication(_)
        )
    }

    /// Innermost error, looking through `WorkerFatal` wrappers.
    pub fn root_cause(&self) -> &GlazeError {
        match self {
            GlazeError::WorkerFatal(cause) => cause.root_cause(),
            other => other,
        }
    }
}
