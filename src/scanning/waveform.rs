//! Time-domain waveforms produced by the scanner.

use crate::error::{GlazeError, GlazeResult};
use crate::protocol::PolarScan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single THz trace before any signal processing.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UnprocessedWaveform {
    /// Delay axis.
    pub time: Vec<f64>,
    /// Lock-in signal at each delay.
    pub signal: Vec<f64>,
}

impl UnprocessedWaveform {
    /// Creates a waveform, checking that both axes have the same length.
    pub fn new(time: Vec<f64>, signal: Vec<f64>) -> GlazeResult<Self> {
        if time.len() != signal.len() {
            return Err(GlazeError::Configuration(format!(
                "time and signal lengths differ: {} vs {}",
                time.len(),
                signal.len()
            )));
        }
        Ok(Self { time, signal })
    }

    /// Builds a waveform from lock-in polar coordinates, angles in degrees.
    ///
    /// Each point keeps its radius as magnitude. Its sign is the sign of
    /// `cos(theta - theta_peak)`, where `theta_peak` is the angle at the largest radius,
    /// so points in phase with the peak are positive and points in antiphase negative.
    pub fn from_polar_coords(time: &[f64], radius: &[f64], theta: &[f64]) -> Self {
        let peak_angle = radius
            .iter()
            .zip(theta)
            .fold(None, |best: Option<(f64, f64)>, (&r, &t)| match best {
                Some((best_r, _)) if best_r >= r => best,
                _ => Some((r, t)),
            })
            .map_or(0.0, |(_, angle)| angle);

        let signal = radius
            .iter()
            .zip(theta)
            .map(|(&r, &t)| r * sign((t - peak_angle).to_radians().cos()))
            .collect();
        Self {
            time: time.to_vec(),
            signal,
        }
    }

    /// Elementwise mean of several waveforms.
    ///
    /// Fails on an empty slice or when the waveforms differ in length.
    pub fn average(waveforms: &[UnprocessedWaveform]) -> GlazeResult<Self> {
        let first = waveforms.first().ok_or_else(|| {
            GlazeError::Configuration("cannot average an empty set of waveforms".into())
        })?;
        let len = first.len();
        if let Some(other) = waveforms.iter().find(|w| w.len() != len) {
            return Err(GlazeError::Configuration(format!(
                "cannot average waveforms of different lengths: {len} vs {}",
                other.len()
            )));
        }

        let count = waveforms.len() as f64;
        let mut time = vec![0.0; len];
        let mut signal = vec![0.0; len];
        for waveform in waveforms {
            for (acc, value) in time.iter_mut().zip(&waveform.time) {
                *acc += value;
            }
            for (acc, value) in signal.iter_mut().zip(&waveform.signal) {
                *acc += value;
            }
        }
        time.iter_mut().for_each(|t| *t /= count);
        signal.iter_mut().for_each(|s| *s /= count);
        Ok(Self { time, signal })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    /// Whether the waveform has no points.
    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }
}

impl From<PolarScan> for UnprocessedWaveform {
    fn from(scan: PolarScan) -> Self {
        Self::from_polar_coords(&scan.times, &scan.radii, &scan.angles)
    }
}

fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// A waveform together with the wall-clock time its capture started.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedWaveform {
    /// Capture start.
    pub timestamp: DateTime<Utc>,
    /// Captured trace.
    pub waveform: UnprocessedWaveform,
}
