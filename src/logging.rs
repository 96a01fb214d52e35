//! Structured logging setup.
//!
//! The crate itself only emits `tracing` events and spans: drivers log at `debug`
//! and `trace`, the negotiator and scan worker at `info` and `warn`. Applications
//! that want to see them install a subscriber with [`init`]:
//!
//! ```no_run
//! use glaze::logging::{self, LogFormat, LoggingConfig};
//! use tracing::Level;
//!
//! # fn main() -> glaze::error::GlazeResult<()> {
//! logging::init(LoggingConfig::new(Level::DEBUG).with_format(LogFormat::Compact))?;
//! tracing::info!(port = "mock_device", "Logging ready");
//! # Ok(())
//! # }
//! ```
//!
//! `RUST_LOG` overrides the configured level when set.

use crate::error::{GlazeError, GlazeResult};
use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored output for development.
    #[default]
    Pretty,
    /// Single-line output without colors.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Maximum level emitted when `RUST_LOG` is unset.
    pub level: Level,
    /// Output format.
    pub format: LogFormat,
    /// Emit span open/close events, which include the busy time of scans.
    pub with_span_events: bool,
    /// Include source file and line.
    pub with_file_and_line: bool,
    /// Include the worker thread name.
    pub with_thread_names: bool,
    /// Colored output. Ignored for compact and JSON output.
    pub with_ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file_and_line: true,
            with_thread_names: true,
            with_ansi: true,
        }
    }
}

impl LoggingConfig {
    /// Default options at `level`.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Default options at a level given by name, e.g. `"debug"`.
    pub fn from_level_name(level: &str) -> GlazeResult<Self> {
        Ok(Self::new(parse_log_level(level)?))
    }

    /// Set the output format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable colors.
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.with_span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install a global subscriber.
///
/// Calling this when a subscriber is already installed (by an earlier call, a test
/// harness, or the application) is not an error.
pub fn init(config: LoggingConfig) -> GlazeResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let pretty = (config.format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .pretty()
            .with_span_events(config.span_events())
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(config.with_ansi)
    });
    let compact = (config.format == LogFormat::Compact).then(|| {
        fmt::layer()
            .compact()
            .with_span_events(config.span_events())
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
            .with_ansi(false)
    });
    let json = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_span_events(config.span_events())
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_thread_names(config.with_thread_names)
    });

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(compact)
        .with(json)
        .try_init();

    match result {
        Ok(()) => Ok(()),
        Err(err) if is_already_initialized(&err.to_string()) => Ok(()),
        Err(err) => Err(GlazeError::Configuration(format!(
            "Failed to initialize logging: {err}"
        ))),
    }
}

fn is_already_initialized(message: &str) -> bool {
    message.contains("global default trace dispatcher has already been set")
        || message.contains("logging system was already initialized")
}

/// Parse a level name, case-insensitively.
pub fn parse_log_level(level: &str) -> GlazeResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(GlazeError::Configuration(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert_eq!(parse_log_level("warn").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("Debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("ERROR").unwrap(), Level::ERROR);
        assert!(matches!(
            parse_log_level("verbose"),
            Err(GlazeError::Configuration(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = LoggingConfig::from_level_name("warn")
            .unwrap()
            .with_format(LogFormat::Json)
            .with_span_events(true)
            .with_ansi(false);

        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.span_events(), FmtSpan::NEW | FmtSpan::CLOSE);
        assert!(!config.with_ansi);
    }

    #[test]
    fn test_format_names() {
        let format: LogFormat = serde_json::from_str("\"compact\"").unwrap();
        assert_eq!(format, LogFormat::Compact);
    }
}
