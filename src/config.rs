//! Device configuration.
//!
//! A [`DeviceConfiguration`] describes how to reach a scanner (port, baud rate, read
//! timeout) and what to scan (point count, integration periods, EMA smoothing, and the
//! normalized delay intervals). Configurations are loaded from:
//! 1. a JSON file written by [`DeviceConfiguration::save`], or
//! 2. a TOML file layered with environment variables prefixed with `GLAZE_`.
//!
//! # Example
//! ```no_run
//! use glaze::config::DeviceConfiguration;
//!
//! let config = DeviceConfiguration::load_layered("config/glaze.toml")?;
//! config.validate()?;
//! println!("Scanning {} points on {}", config.n_points, config.amp_port);
//! # Ok::<(), glaze::error::GlazeError>(())
//! ```

use crate::error::{GlazeError, GlazeResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Lock-in modulation frequency of the scanner, in Hz.
pub const LI_MODULATION_FREQUENCY: f64 = 10_000.0;

/// Longest accepted serial read timeout, in seconds.
pub const MAX_AMP_TIMEOUT_SECONDS: f64 = 3600.0;

/// A normalized delay interval in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    /// Lower bound of the interval.
    pub lower: f64,
    /// Upper bound of the interval.
    pub upper: f64,
}

impl Interval {
    /// Creates an interval without validating it.
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// Absolute length of the interval.
    pub fn length(&self) -> f64 {
        (self.upper - self.lower).abs()
    }

    /// Checks that both bounds lie in `[0, 1]` and are ordered.
    pub fn validate(&self) -> Result<(), String> {
        let in_domain = |v: f64| (0.0..=1.0).contains(&v);
        if !in_domain(self.lower) || !in_domain(self.upper) {
            return Err(format!(
                "Interval [{}, {}] must lie within [0, 1]",
                self.lower, self.upper
            ));
        }
        if self.lower > self.upper {
            return Err(format!(
                "Interval lower bound {} exceeds upper bound {}",
                self.lower, self.upper
            ));
        }
        Ok(())
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::new(0.0, 1.0)
    }
}

/// Configuration of a lock-in based THz scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    /// Serial port identifier, or one of the `mock_device*` names.
    pub amp_port: String,
    /// Identifier of the delay unit attached to the scanner.
    pub delayunit: String,
    /// Serial baud rate.
    #[serde(default = "default_baudrate")]
    pub amp_baudrate: u32,
    /// Read timeout of the serial link, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub amp_timeout_seconds: f64,
    /// Total number of points per scan.
    #[serde(default = "default_n_points")]
    pub n_points: usize,
    /// Lock-in integration periods per point.
    #[serde(default = "default_integration_periods")]
    pub integration_periods: u32,
    /// Whether the device applies exponential moving average smoothing.
    #[serde(default = "default_use_ema")]
    pub use_ema: bool,
    /// Delay intervals to scan. Empty means the full range.
    #[serde(default = "default_scan_intervals")]
    pub scan_intervals: Vec<Interval>,
}

fn default_baudrate() -> u32 {
    1_000_000
}

fn default_timeout_seconds() -> f64 {
    0.2
}

fn default_n_points() -> usize {
    1000
}

fn default_integration_periods() -> u32 {
    10
}

fn default_use_ema() -> bool {
    true
}

fn default_scan_intervals() -> Vec<Interval> {
    vec![Interval::default()]
}

impl DeviceConfiguration {
    /// Device type tag used to look up protocol implementations.
    pub const DEVICE_TYPE: &'static str = "Le";

    /// Creates a configuration with default scan settings.
    pub fn new(amp_port: impl Into<String>, delayunit: impl Into<String>) -> Self {
        Self {
            amp_port: amp_port.into(),
            delayunit: delayunit.into(),
            amp_baudrate: default_baudrate(),
            amp_timeout_seconds: default_timeout_seconds(),
            n_points: default_n_points(),
            integration_periods: default_integration_periods(),
            use_ema: default_use_ema(),
            scan_intervals: default_scan_intervals(),
        }
    }

    /// Load configuration from a TOML file, overridden by `GLAZE_*` environment variables.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> GlazeResult<Self> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GLAZE_"))
            .extract()?;
        Ok(config)
    }

    /// Write the configuration as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> GlazeResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Read a configuration previously written by [`save`](Self::save).
    pub fn load<P: AsRef<Path>>(path: P) -> GlazeResult<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> GlazeResult<()> {
        if self.amp_port.is_empty() {
            return Err(GlazeError::Configuration("amp_port must not be empty".into()));
        }
        if self.n_points == 0 {
            return Err(GlazeError::Configuration("n_points must be positive".into()));
        }
        if self.n_points > usize::from(u16::MAX) {
            return Err(GlazeError::Configuration(format!(
                "n_points {} exceeds the device limit of {}",
                self.n_points,
                u16::MAX
            )));
        }
        if self.integration_periods == 0 || self.integration_periods > u32::from(u16::MAX) {
            return Err(GlazeError::Configuration(format!(
                "integration_periods must be in 1..={}, got {}",
                u16::MAX,
                self.integration_periods
            )));
        }
        let timeout = self.amp_timeout_seconds;
        if !(timeout > 0.0 && timeout <= MAX_AMP_TIMEOUT_SECONDS) {
            return Err(GlazeError::Configuration(format!(
                "amp_timeout_seconds must be in (0, {MAX_AMP_TIMEOUT_SECONDS}], got {timeout}"
            )));
        }
        for interval in &self.scan_intervals {
            interval.validate().map_err(GlazeError::Configuration)?;
        }
        if !self.scan_intervals.is_empty()
            && self.scan_intervals.iter().map(Interval::length).sum::<f64>() <= 0.0
        {
            return Err(GlazeError::Configuration(
                "scan_intervals must have a positive total length".into(),
            ));
        }
        Ok(())
    }

    /// Intervals to scan, falling back to the full range.
    pub fn intervals(&self) -> Vec<Interval> {
        if self.scan_intervals.is_empty() {
            default_scan_intervals()
        } else {
            self.scan_intervals.clone()
        }
    }

    /// Duration of one device sweep: `n_points * integration_periods / 10 kHz`.
    pub fn sweep_length(&self) -> Duration {
        Duration::from_secs_f64(
            self.n_points as f64 * f64::from(self.integration_periods) / LI_MODULATION_FREQUENCY,
        )
    }

    /// Read timeout of the serial link.
    ///
    /// Fails when `amp_timeout_seconds` is negative, not finite or too large to
    /// represent, which [`validate`](Self::validate) also rejects.
    pub fn read_timeout(&self) -> GlazeResult<Duration> {
        Duration::try_from_secs_f64(self.amp_timeout_seconds).map_err(|err| {
            GlazeError::Configuration(format!(
                "invalid amp_timeout_seconds {}: {err}",
                self.amp_timeout_seconds
            ))
        })
    }

    /// Whether the port names an in-process mock device.
    pub fn is_mock(&self) -> bool {
        self.amp_port.contains("mock_device")
    }
}

/// Divides `n_points` between intervals proportionally to their length.
///
/// Integer parts are assigned first. The remaining `round(sum of fractions)` points go
/// one each to the intervals with the largest fractional parts, earlier intervals first
/// on ties.
pub fn points_per_interval(n_points: usize, intervals: &[Interval]) -> Vec<usize> {
    let total_length: f64 = intervals.iter().map(Interval::length).sum();
    if intervals.is_empty() {
        return Vec::new();
    }
    if total_length <= 0.0 {
        let mut points = vec![0; intervals.len()];
        points[0] = n_points;
        return points;
    }

    let shares: Vec<f64> = intervals
        .iter()
        .map(|interval| n_points as f64 * interval.length() / total_length)
        .collect();
    let mut points: Vec<usize> = shares.iter().map(|share| share.trunc() as usize).collect();
    let remainders: Vec<f64> = shares.iter().map(|share| share.fract()).collect();

    let mut order: Vec<usize> = (0..intervals.len()).collect();
    // Stable sort keeps interval order for equal remainders.
    order.sort_by(|&a, &b| remainders[b].total_cmp(&remainders[a]));

    let extra = (remainders.iter().sum::<f64>() + 0.5) as usize;
    for &index in order.iter().take(extra) {
        points[index] += 1;
    }
    points
}

/// Builds the ordered list of delay positions the device sweeps through.
///
/// Each interval contributes an evenly spaced run of its share of points. The interval
/// end point is included only when there is a single interval.
pub fn scanning_list(config: &DeviceConfiguration) -> Vec<f32> {
    let intervals = config.intervals();
    let endpoint = intervals.len() == 1;
    let mut list = Vec::with_capacity(config.n_points);
    for (interval, n) in intervals
        .iter()
        .zip(points_per_interval(config.n_points, &intervals))
    {
        list.extend(linspace(interval.lower, interval.upper, n, endpoint));
    }
    list
}

fn linspace(start: f64, stop: f64, n: usize, endpoint: bool) -> impl Iterator<Item = f32> {
    let divisor = if endpoint { n.saturating_sub(1) } else { n };
    let step = if divisor == 0 {
        0.0
    } else {
        (stop - start) / divisor as f64
    };
    (0..n).map(move |i| (start + step * i as f64) as f32)
}
