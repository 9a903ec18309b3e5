//! # simarine-proto
//!
//! Wire layer for the Simarine Pico telemetry protocol.
//!
//! These types are used by:
//! - `simarine-client`: framing requests and decoding responses/broadcasts
//! - `simarine-cli`: inspecting raw frames in debug output
//!
//! ## Frame layout
//!
//! ```text
//! [0..5)    preamble  = 00 00 00 00 00
//! [5]       marker    = FF
//! [6]       type
//! [7..11)   serial number (u32 BE, zero in client requests)
//! [11..13)  length (u16 BE) = payload + checksum marker + 2 CRC bytes
//! [13..N-3) payload (TLV fields, each introduced by FF)
//! [N-3]     marker    = FF
//! [N-2..N)  CRC-16 (BE), poly 0x1189, over [0, N-3)
//! ```
//!
//! ## Invariants
//! - A parsed [`Message`] is immutable; its payload is a refcounted slice of
//!   the received datagram/segment, never a copy.
//! - [`MessageFields`] cursors are zero-copy views and stay valid for the
//!   lifetime of the owning `Message`.

pub mod crc;
pub mod error;
pub mod fields;
pub mod message;

pub use error::ProtocolError;
pub use fields::{Field, FieldValue, MessageFieldType, MessageFields};
pub use message::{Message, MessageType};

/// Structural delimiter between header regions and in front of every field.
pub const MARKER: u8 = 0xFF;

/// Five zero bytes opening every frame.
pub const PREAMBLE: [u8; 5] = [0x00; 5];

/// Bytes before the payload: preamble, marker, type, serial, length.
pub const HEADER_SIZE: usize = 13;

/// Trailing CRC-16 width.
pub const CRC_SIZE: usize = 2;
