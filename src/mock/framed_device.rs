//! Simulated scanner speaking the header-framed protocol.

use super::{FailureInjector, MockBehavior, MOCK_SERIAL_NUMBER};
use crate::error::{GlazeError, GlazeResult};
use crate::protocol::frame::{
    decode_f32_le, encode_f32_le, encode_frame, instruction, parse_header, HEADER_PREFIX,
    HEADER_SIZE,
};
use crate::transport::Transport;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::trace;

/// Simulated scanner for the framed protocol.
///
/// Incoming bytes are buffered until a complete frame is available. Replies are queued
/// and handed out by `read`/`read_until` in order.
#[derive(Debug)]
pub struct FramedMockDevice {
    behavior: MockBehavior,
    injector: FailureInjector,
    rng: StdRng,
    timeout: Duration,
    closed: bool,
    inbox: Vec<u8>,
    outbox: VecDeque<u8>,
    filter_calls: Option<u16>,
    scanning_list: Option<Vec<f32>>,
    scans_started: u32,
}

impl FramedMockDevice {
    /// Creates a device with empty buffers.
    pub fn new(behavior: MockBehavior, timeout: Duration) -> Self {
        Self {
            behavior,
            injector: FailureInjector::new(behavior),
            rng: StdRng::from_entropy(),
            timeout,
            closed: false,
            inbox: Vec::new(),
            outbox: VecDeque::new(),
            filter_calls: None,
            scanning_list: None,
            scans_started: 0,
        }
    }

    /// Integration periods received through SET_FILTER_CALLS.
    pub fn filter_calls(&self) -> Option<u16> {
        self.filter_calls
    }

    /// Scan point list received through DRIVER_SET.
    pub fn scanning_list(&self) -> Option<&[f32]> {
        self.scanning_list.as_deref()
    }

    /// Number of MANAGER_CALL instructions received.
    pub fn scans_started(&self) -> u32 {
        self.scans_started
    }

    fn reply(&mut self, instr: u16, payload: &[u8]) -> GlazeResult<()> {
        let frame = encode_frame(instr, payload)?;
        self.outbox.extend(frame);
        Ok(())
    }

    fn reply_error(&mut self, message: &str) -> GlazeResult<()> {
        self.reply(instruction::ERROR, message.as_bytes())
    }

    fn check_prefix(&mut self) -> GlazeResult<()> {
        let matches = self
            .inbox
            .iter()
            .zip(HEADER_PREFIX.iter())
            .all(|(a, b)| a == b);
        if matches {
            Ok(())
        } else {
            let garbage = String::from_utf8_lossy(&self.inbox).into_owned();
            self.inbox.clear();
            Err(GlazeError::Communication(format!(
                "Unknown message: {garbage:?}"
            )))
        }
    }

    fn process_inbox(&mut self) -> GlazeResult<()> {
        loop {
            self.check_prefix()?;
            if self.inbox.len() < HEADER_SIZE {
                return Ok(());
            }
            let header = match parse_header(&self.inbox[..HEADER_SIZE]) {
                Ok(header) => header,
                Err(err) => {
                    self.inbox.clear();
                    return self.reply_error(&err.to_string());
                }
            };
            let frame_len = HEADER_SIZE + usize::from(header.payload_size);
            if self.inbox.len() < frame_len {
                return Ok(());
            }
            let payload: Vec<u8> = self.inbox.drain(..frame_len).skip(HEADER_SIZE).collect();
            self.handle(header.instruction, &payload)?;
        }
    }

    fn handle(&mut self, instr: u16, payload: &[u8]) -> GlazeResult<()> {
        trace!(instruction = format_args!("{instr:#06x}"), len = payload.len(), "mock frame");
        match instr {
            instruction::SYS_PING => self.reply(instruction::SYS_PING, &[]),
            instruction::RECEIVER_SET_FILTER_CALLS => {
                match payload {
                    [lo, hi] => self.filter_calls = Some(u16::from_le_bytes([*lo, *hi])),
                    _ => self.reply_error("SET_FILTER_CALLS expects a 2-byte payload")?,
                }
                Ok(())
            }
            instruction::DRIVER_SET => {
                self.scanning_list = Some(decode_f32_le(payload));
                Ok(())
            }
            instruction::MANAGER_CALL => {
                self.scans_started += 1;
                Ok(())
            }
            instruction::MANAGER_DATA => self.send_scan_data(),
            instruction::MEMORY_SEND => {
                let mut serial = MOCK_SERIAL_NUMBER.as_bytes().to_vec();
                serial.extend_from_slice(&[0, 0]);
                self.reply(instruction::MEMORY_SEND, &serial)
            }
            other => self.reply_error(&format!("Unknown instruction {other:#06x}")),
        }
    }

    fn send_scan_data(&mut self) -> GlazeResult<()> {
        let Some(n) = self.scanning_list.as_ref().map(Vec::len) else {
            return self.reply_error("No scanning list set");
        };
        if self.injector.next_scan_fails() {
            return Ok(());
        }
        let cos: Vec<f32> = (0..n).map(|_| self.rng.gen::<f32>()).collect();
        let sin: Vec<f32> = (0..n).map(|_| self.rng.gen::<f32>()).collect();
        self.reply(instruction::MANAGER_DATA, &encode_f32_le(&cos))?;
        self.reply(instruction::MANAGER_DATA, &encode_f32_le(&sin))
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
impl Transport for FramedMockDevice {
    async fn write(&mut self, bytes: &[u8]) -> GlazeResult<()> {
        self.ensure_open()?;
        self.inbox.extend_from_slice(bytes);
        self.process_inbox()
    }

    async fn read(&mut self, n: usize) -> GlazeResult<Vec<u8>> {
        self.ensure_open()?;
        if self.behavior.empty_responses {
            return Ok(Vec::new());
        }
        let take = n.min(self.outbox.len());
        Ok(self.outbox.drain(..take).collect())
    }

    async fn read_until(&mut self, delimiter: u8) -> GlazeResult<Vec<u8>> {
        self.ensure_open()?;
        if self.behavior.empty_responses {
            return Ok(Vec::new());
        }
        let take = self
            .outbox
            .iter()
            .position(|&b| b == delimiter)
            .map_or(self.outbox.len(), |pos| pos + 1);
        Ok(self.outbox.drain(..take).collect())
    }

    async fn close(&mut self) -> GlazeResult<()> {
        self.closed = true;
        self.outbox.clear();
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(behavior: MockBehavior) -> FramedMockDevice {
        FramedMockDevice::new(behavior, Duration::from_millis(150))
    }

    #[tokio::test]
    async fn test_ping_is_echoed() {
        let mut device = device(MockBehavior::default());
        device.write(&encode_frame(instruction::SYS_PING, &[]).unwrap()).await.unwrap();
        let header = parse_header(&device.read(HEADER_SIZE).await.unwrap()).unwrap();
        assert_eq!(header.instruction, instruction::SYS_PING);
        assert_eq!(header.payload_size, 0);
    }

    #[tokio::test]
    async fn test_frame_split_across_writes() {
        let mut device = device(MockBehavior::default());
        let frame = encode_frame(instruction::RECEIVER_SET_FILTER_CALLS, &7u16.to_le_bytes()).unwrap();
        device.write(&frame[..5]).await.unwrap();
        assert_eq!(device.filter_calls(), None);
        device.write(&frame[5..]).await.unwrap();
        assert_eq!(device.filter_calls(), Some(7));
    }

    #[tokio::test]
    async fn test_scan_data_is_two_arrays() {
        let mut device = device(MockBehavior::default());
        let list = encode_f32_le(&[0.0, 0.5, 1.0]);
        device.write(&encode_frame(instruction::DRIVER_SET, &list).unwrap()).await.unwrap();
        device.write(&encode_frame(instruction::MANAGER_DATA, &[]).unwrap()).await.unwrap();
        for _ in 0..2 {
            let header = parse_header(&device.read(HEADER_SIZE).await.unwrap()).unwrap();
            assert_eq!(header.instruction, instruction::MANAGER_DATA);
            assert_eq!(header.payload_size, 12);
            assert_eq!(device.read(12).await.unwrap().len(), 12);
        }
    }

    #[tokio::test]
    async fn test_unknown_instruction_yields_error_frame() {
        let mut device = device(MockBehavior::default());
        device.write(&encode_frame(instruction::LED_TOGGLE, &[]).unwrap()).await.unwrap();
        let header = parse_header(&device.read(HEADER_SIZE).await.unwrap()).unwrap();
        assert_eq!(header.instruction, instruction::ERROR);
    }

    #[tokio::test]
    async fn test_command_bytes_are_rejected() {
        let mut device = device(MockBehavior::default());
        assert!(matches!(
            device.write(b"H").await,
            Err(GlazeError::Communication(_))
        ));
    }
}
