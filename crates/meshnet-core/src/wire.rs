//! L3 frame codec
//!
//! This module defines the wire format of the six network-layer frame types
//! and the explicit serialisers/parsers for them. All multi-byte fields are
//! little-endian; nothing here depends on host representation.
//!
//! ## Frame layout
//!
//! ```text
//!    byte 0       byte 1...
//!   +----------+-------------------------------------------+
//!   | ----TTTT | type-specific payload                     |
//!   +----------+-------------------------------------------+
//!
//!   T = type code (low nibble; the high nibble is reserved,
//!       zero on transmit, ignored on receive)
//!
//!   0x0 DataToBase      | srcAddr:u8  command:u8  data...          (>= 3)
//!   0x1 DataToDevice    | dstAddr:u8  command:u8  data...          (>= 3)
//!   0x2 Beacon          | networkId:u16  baseNonce:u32             (= 7)
//!   0x3 ChildResponse   | childNonce:u32  hmac:u32                 (= 9)
//!   0x4 ParentResponse  | childNonce:u32  parentNonce:u32  hmac:u32 (= 13)
//!   0x5 AssignAddress   | childNonce:u32  address:u8  maxRoute:u8  hmac:u32 (= 11)
//! ```
//!
//! The `hmac` fields carry the low 32 bits of HMAC-SHA1 computed over the
//! frame minus its trailing 4 bytes; see the [`crate::keys`] module.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum length of any L3 frame.
pub const MIN_FRAME_LEN: usize = 3;

/// Maximum length of an L3 frame (must fit in a single L2 frame).
pub const MAX_FRAME_LEN: usize = 255;

/// Maximum L4 data length in a data frame (type, address and command bytes
/// are subtracted from [`MAX_FRAME_LEN`]).
pub const MAX_DATA_LEN: usize = MAX_FRAME_LEN - 3;

/// Fixed length of a `Beacon` frame.
pub const BEACON_LEN: usize = 7;

/// Fixed length of a `BeaconChildResponse` frame.
pub const CHILD_RESPONSE_LEN: usize = 9;

/// Fixed length of a `BeaconParentResponse` frame.
pub const PARENT_RESPONSE_LEN: usize = 13;

/// Fixed length of an `AssignAddress` frame.
pub const ASSIGN_ADDRESS_LEN: usize = 11;

/// L3 frame type, discriminated by the low nibble of byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum FrameType {
    /// Unicast application data travelling toward the base.
    DataToBase = 0x0,
    /// Unicast application data travelling toward a device.
    DataToDevice = 0x1,
    /// Base-originated network advertisement, flooded through the tree.
    Beacon = 0x2,
    /// A device announcing itself to its prospective parent.
    ChildResponse = 0x3,
    /// A parent reporting a parent-child edge back to the base.
    ParentResponse = 0x4,
    /// The base assigning an address and routing range to a device.
    AssignAddress = 0x5,
}

impl FrameType {
    /// Decode a type from byte 0 of a frame. The reserved high nibble is
    /// ignored on receive.
    pub fn from_byte(byte: u8) -> Option<FrameType> {
        match byte & 0x0F {
            0x0 => Some(FrameType::DataToBase),
            0x1 => Some(FrameType::DataToDevice),
            0x2 => Some(FrameType::Beacon),
            0x3 => Some(FrameType::ChildResponse),
            0x4 => Some(FrameType::ParentResponse),
            0x5 => Some(FrameType::AssignAddress),
            _ => None,
        }
    }

    /// The fixed on-wire length for fixed-length types, `None` for the
    /// variable-length data types.
    pub fn fixed_len(&self) -> Option<usize> {
        match self {
            FrameType::DataToBase | FrameType::DataToDevice => None,
            FrameType::Beacon => Some(BEACON_LEN),
            FrameType::ChildResponse => Some(CHILD_RESPONSE_LEN),
            FrameType::ParentResponse => Some(PARENT_RESPONSE_LEN),
            FrameType::AssignAddress => Some(ASSIGN_ADDRESS_LEN),
        }
    }
}

/// Reasons a byte buffer failed to parse as an L3 frame.
///
/// The protocol engine never surfaces these on the wire; a parse failure is
/// a silent drop. They exist so the codec is testable in isolation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Shorter than the 3-byte minimum.
    Truncated { len: usize },
    /// Type code not one of the six assigned values.
    UnknownType { code: u8 },
    /// A fixed-length type with the wrong length.
    LengthMismatch {
        frame_type: FrameType,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Truncated { len } => {
                write!(f, "frame too short: {} bytes", len)
            }
            FrameError::UnknownType { code } => {
                write!(f, "unknown frame type code {:#x}", code)
            }
            FrameError::LengthMismatch {
                frame_type,
                expected,
                actual,
            } => write!(
                f,
                "{:?} frame must be {} bytes, got {}",
                frame_type, expected, actual
            ),
        }
    }
}

impl std::error::Error for FrameError {}

/// A parsed L3 frame.
///
/// Forwarding paths relay the *received bytes* verbatim and only use the
/// parsed value to read fields; `encode` is for frames this node originates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    DataToBase {
        src: u8,
        command: u8,
        data: Vec<u8>,
    },
    DataToDevice {
        dst: u8,
        command: u8,
        data: Vec<u8>,
    },
    Beacon {
        network_id: u16,
        base_nonce: u32,
    },
    ChildResponse {
        child_nonce: u32,
        hmac: u32,
    },
    ParentResponse {
        child_nonce: u32,
        parent_nonce: u32,
        hmac: u32,
    },
    AssignAddress {
        child_nonce: u32,
        address: u8,
        max_route: u8,
        hmac: u32,
    },
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

impl Frame {
    /// Parse a received byte buffer.
    pub fn parse(bytes: &[u8]) -> Result<Frame, FrameError> {
        if bytes.len() < MIN_FRAME_LEN {
            return Err(FrameError::Truncated { len: bytes.len() });
        }
        let frame_type = FrameType::from_byte(bytes[0])
            .ok_or(FrameError::UnknownType { code: bytes[0] & 0x0F })?;
        if let Some(expected) = frame_type.fixed_len() {
            if bytes.len() != expected {
                return Err(FrameError::LengthMismatch {
                    frame_type,
                    expected,
                    actual: bytes.len(),
                });
            }
        }
        let frame = match frame_type {
            FrameType::DataToBase => Frame::DataToBase {
                src: bytes[1],
                command: bytes[2],
                data: bytes[3..].to_vec(),
            },
            FrameType::DataToDevice => Frame::DataToDevice {
                dst: bytes[1],
                command: bytes[2],
                data: bytes[3..].to_vec(),
            },
            FrameType::Beacon => Frame::Beacon {
                network_id: read_u16(bytes, 1),
                base_nonce: read_u32(bytes, 3),
            },
            FrameType::ChildResponse => Frame::ChildResponse {
                child_nonce: read_u32(bytes, 1),
                hmac: read_u32(bytes, 5),
            },
            FrameType::ParentResponse => Frame::ParentResponse {
                child_nonce: read_u32(bytes, 1),
                parent_nonce: read_u32(bytes, 5),
                hmac: read_u32(bytes, 9),
            },
            FrameType::AssignAddress => Frame::AssignAddress {
                child_nonce: read_u32(bytes, 1),
                address: bytes[5],
                max_route: bytes[6],
                hmac: read_u32(bytes, 7),
            },
        };
        Ok(frame)
    }

    /// The frame's type code.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::DataToBase { .. } => FrameType::DataToBase,
            Frame::DataToDevice { .. } => FrameType::DataToDevice,
            Frame::Beacon { .. } => FrameType::Beacon,
            Frame::ChildResponse { .. } => FrameType::ChildResponse,
            Frame::ParentResponse { .. } => FrameType::ParentResponse,
            Frame::AssignAddress { .. } => FrameType::AssignAddress,
        }
    }

    /// Serialise to wire bytes. The high nibble of byte 0 is always zero.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PARENT_RESPONSE_LEN);
        bytes.push(self.frame_type() as u8);
        match self {
            Frame::DataToBase { src, command, data } => {
                bytes.push(*src);
                bytes.push(*command);
                bytes.extend_from_slice(data);
            }
            Frame::DataToDevice { dst, command, data } => {
                bytes.push(*dst);
                bytes.push(*command);
                bytes.extend_from_slice(data);
            }
            Frame::Beacon {
                network_id,
                base_nonce,
            } => {
                bytes.extend_from_slice(&network_id.to_le_bytes());
                bytes.extend_from_slice(&base_nonce.to_le_bytes());
            }
            Frame::ChildResponse { child_nonce, hmac } => {
                bytes.extend_from_slice(&child_nonce.to_le_bytes());
                bytes.extend_from_slice(&hmac.to_le_bytes());
            }
            Frame::ParentResponse {
                child_nonce,
                parent_nonce,
                hmac,
            } => {
                bytes.extend_from_slice(&child_nonce.to_le_bytes());
                bytes.extend_from_slice(&parent_nonce.to_le_bytes());
                bytes.extend_from_slice(&hmac.to_le_bytes());
            }
            Frame::AssignAddress {
                child_nonce,
                address,
                max_route,
                hmac,
            } => {
                bytes.extend_from_slice(&child_nonce.to_le_bytes());
                bytes.push(*address);
                bytes.push(*max_route);
                bytes.extend_from_slice(&hmac.to_le_bytes());
            }
        }
        bytes
    }
}
