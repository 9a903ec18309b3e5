//! Frame codec: build and parse complete protocol messages.

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::crc16;
use crate::error::ProtocolError;
use crate::fields::MessageFields;
use crate::{CRC_SIZE, HEADER_SIZE, MARKER, PREAMBLE};

// ── Message types ─────────────────────────────────────────────────────────────

/// Command / response identifiers observed on the TCP and UDP channels.
///
/// The four `UnknownXx` codes are seen in captures but undocumented; they are
/// recognized and parsed generically, nothing more. `Other` admits any code
/// the controller may emit unsolicited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Serial number and firmware version.
    SystemInfo,
    /// Device and sensor counts (zero-indexed last ids).
    DeviceSensorCount,
    Unknown03,
    Unknown10,
    /// Sensor catalogue entry for one sensor index.
    SensorInfo,
    /// Device catalogue entry for one device index.
    DeviceInfo,
    Unknown50,
    UnknownAa,
    /// Latest value of every sensor, keyed by field id.
    SensorsState,
    /// UDP broadcast carrying the 72-hour barometric time series.
    AtmosphericPressureHistory,
    /// Any code outside the enumeration above.
    Other(u8),
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::SystemInfo,
            0x02 => Self::DeviceSensorCount,
            0x03 => Self::Unknown03,
            0x10 => Self::Unknown10,
            0x20 => Self::SensorInfo,
            0x41 => Self::DeviceInfo,
            0x50 => Self::Unknown50,
            0xAA => Self::UnknownAa,
            0xB0 => Self::SensorsState,
            0xC1 => Self::AtmosphericPressureHistory,
            other => Self::Other(other),
        }
    }

    pub fn byte(self) -> u8 {
        match self {
            Self::SystemInfo => 0x01,
            Self::DeviceSensorCount => 0x02,
            Self::Unknown03 => 0x03,
            Self::Unknown10 => 0x10,
            Self::SensorInfo => 0x20,
            Self::DeviceInfo => 0x41,
            Self::Unknown50 => 0x50,
            Self::UnknownAa => 0xAA,
            Self::SensorsState => 0xB0,
            Self::AtmosphericPressureHistory => 0xC1,
            Self::Other(b) => b,
        }
    }

    /// Whether this code is part of the documented enumeration.
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

// ── Message ───────────────────────────────────────────────────────────────────

/// One immutable protocol frame.
///
/// `bytes` is the complete on-wire image, kept for retransmission and debug
/// logging; `fields` is a lazy cursor over the payload slice.
#[derive(Debug, Clone)]
pub struct Message {
    message_type: MessageType,
    serial_number: u32,
    length: u16,
    bytes: Bytes,
    fields: MessageFields,
}

impl Message {
    /// Assemble a client-originated frame (serial number zero).
    pub fn build(message_type: MessageType, payload: &[u8]) -> Message {
        Self::build_with_serial(message_type, payload, 0)
    }

    /// Assemble a frame with an explicit serial number.
    pub fn build_with_serial(message_type: MessageType, payload: &[u8], serial_number: u32) -> Message {
        let length = (payload.len() + 1 + CRC_SIZE) as u16;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len() + 1 + CRC_SIZE);
        buf.put_slice(&PREAMBLE);
        buf.put_u8(MARKER);
        buf.put_u8(message_type.byte());
        buf.put_u32(serial_number);
        buf.put_u16(length);
        buf.put_slice(payload);

        let crc = crc16(&buf);
        buf.put_u8(MARKER);
        buf.put_u16(crc);

        let bytes = buf.freeze();
        let fields = MessageFields::new(bytes.slice(HEADER_SIZE..bytes.len() - 3));
        Message {
            message_type,
            serial_number,
            length,
            bytes,
            fields,
        }
    }

    /// Validate and decode one received frame.
    ///
    /// When `expected_type` is set the frame must carry exactly that type;
    /// without it any code is tolerated, including ones outside the
    /// enumeration (broadcast listeners see firmware-dependent traffic).
    pub fn parse(bytes: impl Into<Bytes>, expected_type: Option<MessageType>) -> Result<Message, ProtocolError> {
        let bytes: Bytes = bytes.into();
        let n = bytes.len();

        if n < HEADER_SIZE + CRC_SIZE {
            return Err(ProtocolError::InvalidHeaderLength(n));
        }
        if bytes[..5] != PREAMBLE {
            return Err(ProtocolError::InvalidHeaderPreamble);
        }
        if bytes[5] != MARKER {
            return Err(ProtocolError::InvalidHeaderMarker);
        }

        let message_type = MessageType::from_byte(bytes[6]);
        if let Some(expected) = expected_type {
            if !message_type.is_known() {
                return Err(ProtocolError::UnknownMessageType(bytes[6]));
            }
            if message_type != expected {
                return Err(ProtocolError::MessageTypeMismatch {
                    expected,
                    got: message_type,
                });
            }
        }

        let serial_number = u32::from_be_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]);
        let length = u16::from_be_bytes([bytes[11], bytes[12]]);
        if length as usize != n - HEADER_SIZE {
            return Err(ProtocolError::InvalidMessageLength {
                field: length as usize,
                actual: n - HEADER_SIZE,
            });
        }

        if bytes[n - 3] != MARKER {
            return Err(ProtocolError::InvalidChecksumMarker);
        }

        let computed = crc16(&bytes[..n - 3]);
        let found = u16::from_be_bytes([bytes[n - 2], bytes[n - 1]]);
        if computed != found {
            return Err(ProtocolError::CrcMismatch { computed, found });
        }

        let fields = MessageFields::new(bytes.slice(HEADER_SIZE..n - 3));
        Ok(Message {
            message_type,
            serial_number,
            length,
            bytes,
            fields,
        })
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn serial_number(&self) -> u32 {
        self.serial_number
    }

    /// Value of the wire length field: payload + checksum marker + CRC.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Payload region, without header or CRC trailer.
    pub fn payload(&self) -> Bytes {
        self.bytes.slice(HEADER_SIZE..self.bytes.len() - 3)
    }

    /// Lazy TLV cursor over the payload.
    pub fn fields(&self) -> &MessageFields {
        &self.fields
    }

    /// Complete on-wire image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}
