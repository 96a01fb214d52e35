//! Simulated scanner speaking the single-byte command protocol.

use super::{FailureInjector, MockBehavior, MOCK_SERIAL_NUMBER, TIME_WINDOW};
use crate::config::LI_MODULATION_FREQUENCY;
use crate::error::{GlazeError, GlazeResult};
use crate::protocol::frame::{decode_f32_le, encode_f32_le};
use crate::transport::{Transport, LINE_DELIMITER};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use tracing::trace;

/// Firmware version reported by the simulated command-protocol device.
pub const MOCK_FIRMWARE_VERSION: &str = "v0.1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    WaitingForSettings,
    WaitingForList,
    ReceivedSettings,
    ReceivedList,
    ReceivedStatusRequest,
    ReceivedSerialNumberRequest,
    ReceivedFirmwareVersionRequest,
    StartingScan,
    Scanning,
}

/// Simulated lock-in scanner for the command protocol.
///
/// Responses depend only on the device state, which advances with every write and
/// read the way the firmware state machine does.
#[derive(Debug)]
pub struct CommandMockDevice {
    state: State,
    injector: FailureInjector,
    behavior: MockBehavior,
    rng: StdRng,
    timeout: Duration,
    closed: bool,
    is_scanning: bool,
    scan_start: Option<Instant>,
    n_scanning_points: Option<u16>,
    integration_periods: Option<u16>,
    use_ema: Option<bool>,
    scanning_list: Option<Vec<f32>>,
}

impl CommandMockDevice {
    /// Creates an idle device.
    pub fn new(behavior: MockBehavior, timeout: Duration) -> Self {
        Self {
            state: State::Idle,
            injector: FailureInjector::new(behavior),
            behavior,
            rng: StdRng::from_entropy(),
            timeout,
            closed: false,
            is_scanning: false,
            scan_start: None,
            n_scanning_points: None,
            integration_periods: None,
            use_ema: None,
            scanning_list: None,
        }
    }

    /// Settings received from the host: points, integration periods, EMA flag.
    pub fn settings(&self) -> Option<(u16, u16, bool)> {
        Some((
            self.n_scanning_points?,
            self.integration_periods?,
            self.use_ema?,
        ))
    }

    /// Scan point list received from the host.
    pub fn scanning_list(&self) -> Option<&[f32]> {
        self.scanning_list.as_deref()
    }

    fn scanning_time(&self) -> GlazeResult<Duration> {
        if self.behavior.instant_response {
            return Ok(Duration::ZERO);
        }
        match (self.n_scanning_points, self.integration_periods) {
            (Some(points), Some(periods)) => Ok(Duration::from_secs_f64(
                f64::from(points) * f64::from(periods) / LI_MODULATION_FREQUENCY,
            )),
            _ => Err(GlazeError::Communication(
                "Cannot calculate scanning time before settings are received".into(),
            )),
        }
    }

    fn scan_has_finished(&mut self) -> GlazeResult<bool> {
        if !self.is_scanning {
            return Ok(true);
        }
        let start = self
            .scan_start
            .ok_or_else(|| GlazeError::Communication("Scan start time is unset".into()))?;
        let finished = start.elapsed() > self.scanning_time()?;
        if finished {
            self.is_scanning = false;
            self.scan_start = None;
        }
        Ok(finished)
    }

    fn handle_idle(&mut self, bytes: &[u8]) -> GlazeResult<()> {
        match bytes {
            b"S" => self.state = State::WaitingForSettings,
            b"L" => self.state = State::WaitingForList,
            b"G" => {
                self.state = State::StartingScan;
                self.scan_start = Some(Instant::now());
            }
            b"R" => {
                self.scan_has_finished()?;
            }
            b"H" => self.state = State::ReceivedStatusRequest,
            b"s" => self.state = State::ReceivedSerialNumberRequest,
            b"v" => self.state = State::ReceivedFirmwareVersionRequest,
            other => {
                return Err(GlazeError::Communication(format!(
                    "Unknown message: {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        }
        Ok(())
    }

    fn handle_scanning(&mut self, bytes: &[u8]) -> GlazeResult<()> {
        match bytes {
            b"H" => self.state = State::ReceivedStatusRequest,
            b"R" => {
                if self.scan_has_finished()? {
                    self.state = State::Idle;
                }
            }
            other => {
                return Err(GlazeError::Communication(format!(
                    "Unexpected message while scanning: {:?}",
                    String::from_utf8_lossy(other)
                )))
            }
        }
        Ok(())
    }

    fn handle_settings(&mut self, bytes: &[u8]) -> GlazeResult<()> {
        let ints: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let [points, periods, ema] = ints[..] else {
            return Err(GlazeError::Communication(format!(
                "Expected 3 settings values, got {}",
                ints.len()
            )));
        };
        self.n_scanning_points = Some(points);
        self.integration_periods = Some(periods);
        self.use_ema = Some(ema != 0);
        self.state = State::ReceivedSettings;
        Ok(())
    }

    fn create_scan_bytes(&mut self) -> GlazeResult<Vec<u8>> {
        let list = self
            .scanning_list
            .as_ref()
            .ok_or_else(|| GlazeError::Communication("Scanning list is unset".into()))?;
        if self.injector.next_scan_fails() {
            return Ok(Vec::new());
        }
        let mut numbers: Vec<f32> = list
            .iter()
            .map(|&point| (f64::from(point) * TIME_WINDOW) as f32)
            .collect();
        let n = list.len();
        numbers.extend((0..2 * n).map(|_| self.rng.gen::<f32>()));
        Ok(encode_f32_le(&numbers))
    }

    fn line(text: &str) -> Vec<u8> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(LINE_DELIMITER);
        bytes
    }

    fn ensure_open(&self) -> GlazeResult<()> {
        if self.closed {
            Err(GlazeError::Transport("mock device is closed".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for CommandMockDevice {
    async fn write(&mut self, bytes: &[u8]) -> GlazeResult<()> {
        self.ensure_open()?;
        trace!(state = ?self.state, len = bytes.len(), "mock write");
        match self.state {
            State::WaitingForSettings => self.handle_settings(bytes),
            State::WaitingForList => {
                self.scanning_list = Some(decode_f32_le(bytes));
                self.state = State::ReceivedList;
                Ok(())
            }
            State::Idle => self.handle_idle(bytes),
            State::Scanning => self.handle_scanning(bytes),
            state => Err(GlazeError::Communication(format!(
                "Device busy in state {state:?}"
            ))),
        }
    }

    async fn read(&mut self, _n: usize) -> GlazeResult<Vec<u8>> {
        self.ensure_open()?;
        if self.behavior.empty_responses {
            return Ok(Vec::new());
        }
        match self.state {
            State::Idle => self.create_scan_bytes(),
            State::ReceivedSerialNumberRequest => {
                self.state = State::Idle;
                Ok(MOCK_SERIAL_NUMBER.as_bytes().to_vec())
            }
            state => Err(GlazeError::Communication(format!(
                "No binary response in state {state:?}"
            ))),
        }
    }

    async fn read_until(&mut self, _delimiter: u8) -> GlazeResult<Vec<u8>> {
        self.ensure_open()?;
        if self.behavior.empty_responses {
            return Ok(Vec::new());
        }
        let text = match self.state {
            State::WaitingForSettings => "ACK: Ready to receive settings.",
            State::ReceivedSettings => {
                self.state = State::Idle;
                "ACK: Settings received."
            }
            State::WaitingForList => "ACK: Ready to receive list.",
            State::ReceivedList => {
                self.state = State::Idle;
                "ACK: List received."
            }
            State::StartingScan => {
                self.state = State::Scanning;
                self.is_scanning = true;
                "ACK: Scan started."
            }
            State::ReceivedFirmwareVersionRequest => {
                self.state = State::Idle;
                MOCK_FIRMWARE_VERSION
            }
            State::ReceivedStatusRequest => {
                if self.scan_has_finished()? {
                    self.state = State::Idle;
                    "ACK: Idle."
                } else {
                    self.state = State::Scanning;
                    "Error: Scan is ongoing."
                }
            }
            state => {
                return Err(GlazeError::Communication(format!(
                    "No text response in state {state:?}"
                )))
            }
        };
        Ok(Self::line(text))
    }

    async fn close(&mut self) -> GlazeResult<()> {
        self.closed = true;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}
