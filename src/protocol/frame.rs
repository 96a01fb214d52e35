//! Header-framed wire format.
//!
//! Every message is an 8-byte header followed by `size` payload bytes:
//!
//! ```text
//! +-----+-----+------+---------+---------+---------+----------+----------+
//! | 'A' | 'B' | 0x00 | version | size_hi | size_lo | instr_hi | instr_lo |
//! +-----+-----+------+---------+---------+---------+----------+----------+
//! ```
//!
//! Header fields are big-endian. Payload scalars and float arrays are little-endian.

use crate::error::{GlazeError, GlazeResult};
use bytes::{Buf, BufMut, BytesMut};

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Marker bytes opening every header.
pub const HEADER_PREFIX: [u8; 2] = *b"AB";

/// Supported framing version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Instruction codes understood by the scanner firmware.
pub mod instruction {
    /// Ping; the device echoes an empty PING.
    pub const SYS_PING: u16 = 0x0000;
    /// Device-side error; payload is UTF-8 text.
    pub const ERROR: u16 = 0xF000;
    /// Device-side warning.
    pub const WARNING: u16 = 0xF001;
    /// Informational message.
    pub const INFO: u16 = 0xF002;
    /// Typed scalar payloads.
    pub const UINT8: u16 = 0xF003;
    #[allow(missing_docs)]
    pub const UINT16: u16 = 0xF004;
    #[allow(missing_docs)]
    pub const UINT32: u16 = 0xF005;
    #[allow(missing_docs)]
    pub const FLOAT: u16 = 0xF006;
    #[allow(missing_docs)]
    pub const STRING: u16 = 0xF007;
    #[allow(missing_docs)]
    pub const HEX: u16 = 0xF008;
    #[allow(missing_docs)]
    pub const BIT: u16 = 0xF009;

    /// Reset the controller.
    pub const SYS_RESET: u16 = 0xA000;
    /// Query the system clock.
    pub const SYS_CLOCK: u16 = 0xA001;

    /// Operating system diagnostics.
    pub const OS_THREADS: u16 = 0xA100;
    #[allow(missing_docs)]
    pub const OS_STACKS: u16 = 0xA101;
    #[allow(missing_docs)]
    pub const OS_HEAPS: u16 = 0xA102;
    #[allow(missing_docs)]
    pub const OS_USAGE: u16 = 0xA103;
    #[allow(missing_docs)]
    pub const OS_UPTIME: u16 = 0xA104;

    /// Status LED control.
    pub const LED_TOGGLE: u16 = 0xA200;
    #[allow(missing_docs)]
    pub const LED_ON: u16 = 0xA201;
    #[allow(missing_docs)]
    pub const LED_OFF: u16 = 0xA202;

    /// Receiver DAC lookup table.
    pub const RECEIVER_DAC_TABLE: u16 = 0xA300;
    /// Raw ADC samples.
    pub const RECEIVER_ADC_ARRAY: u16 = 0xA301;
    /// Filtered samples.
    pub const RECEIVER_FILTER_ARRAY: u16 = 0xA302;
    /// Receiver amplitude.
    pub const RECEIVER_SET_AMPLITUDE: u16 = 0xA303;
    /// Lock-in integration periods, LE `u16` payload.
    pub const RECEIVER_SET_FILTER_CALLS: u16 = 0xA304;

    /// Move the delay driver.
    pub const DRIVER_MOVE: u16 = 0xA400;
    /// Movement trajectory.
    pub const DRIVER_MOVEMENT_ARRAY: u16 = 0xA401;
    /// Scan point list, LE `f32` payload.
    pub const DRIVER_SET: u16 = 0xA402;
    /// Delay positions.
    pub const DRIVER_DELAY_ARRAY: u16 = 0xA403;

    /// Persistent memory readout (serial number).
    pub const MEMORY_SEND: u16 = 0xA500;

    /// Start a scan; no acknowledgement.
    pub const MANAGER_CALL: u16 = 0xA600;
    /// Request scan data; answered by two float arrays.
    pub const MANAGER_DATA: u16 = 0xA601;
    /// Measurement setup.
    pub const MANAGER_SETUP: u16 = 0xA602;
    /// Single measurement.
    pub const MANAGER_MEASURE: u16 = 0xA603;
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Number of payload bytes following the header.
    pub payload_size: u16,
    /// Instruction code.
    pub instruction: u16,
}

/// Encode a complete frame.
pub fn encode_frame(instruction: u16, payload: &[u8]) -> GlazeResult<Vec<u8>> {
    let size = u16::try_from(payload.len()).map_err(|_| {
        GlazeError::ProtocolFormat(format!(
            "payload of {} bytes exceeds the frame limit of {}",
            payload.len(),
            u16::MAX
        ))
    })?;
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_slice(&HEADER_PREFIX);
    frame.put_u8(0);
    frame.put_u8(PROTOCOL_VERSION);
    frame.put_u16(size);
    frame.put_u16(instruction);
    frame.put_slice(payload);
    Ok(frame.to_vec())
}

/// Validate and decode an 8-byte header.
pub fn parse_header(header: &[u8]) -> GlazeResult<FrameHeader> {
    if header.len() != HEADER_SIZE {
        return Err(GlazeError::ProtocolFormat(format!(
            "Invalid header size: expected {HEADER_SIZE}, got {}",
            header.len()
        )));
    }
    if header[0..2] != HEADER_PREFIX {
        return Err(GlazeError::ProtocolFormat(format!(
            "Invalid header prefix: expected {:?}, got {:?}",
            HEADER_PREFIX,
            &header[0..2]
        )));
    }
    if header[2] != 0 {
        return Err(GlazeError::ProtocolFormat(format!(
            "Invalid header byte 2: expected 0, got {}",
            header[2]
        )));
    }
    if header[3] != PROTOCOL_VERSION {
        return Err(GlazeError::ProtocolFormat(format!(
            "Invalid protocol version: expected {PROTOCOL_VERSION}, got {}",
            header[3]
        )));
    }
    let mut fields = &header[4..];
    Ok(FrameHeader {
        payload_size: fields.get_u16(),
        instruction: fields.get_u16(),
    })
}

/// Pack values as consecutive little-endian `f32`.
pub fn encode_f32_le(values: &[f32]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(values.len() * 4);
    for &value in values {
        buf.put_f32_le(value);
    }
    buf.to_vec()
}

/// Unpack consecutive little-endian `f32`. Trailing bytes are ignored.
pub fn decode_f32_le(mut bytes: &[u8]) -> Vec<f32> {
    let mut values = Vec::with_capacity(bytes.len() / 4);
    while bytes.remaining() >= 4 {
        values.push(bytes.get_f32_le());
    }
    values
}
