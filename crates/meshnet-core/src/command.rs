//! L4 command framing
//!
//! An L4 payload is a command byte followed by opaque data. The only
//! command the network layer itself understands is command 0: a request for
//! (and the format of) the device-info report every device sends to the
//! base right after joining.

use serde::{Deserialize, Serialize};

/// The mandatory device-info command.
pub const DEVICE_INFO_COMMAND: u8 = 0;

/// Body of a command-0 report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_type: u32,
    pub device_unique_id: u32,
}

impl DeviceInfo {
    /// Encoded length: two little-endian `u32`s.
    pub const LEN: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[..4].copy_from_slice(&self.device_type.to_le_bytes());
        bytes[4..].copy_from_slice(&self.device_unique_id.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN {
            return None;
        }
        Some(Self {
            device_type: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            device_unique_id: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info_layout() {
        let info = DeviceInfo {
            device_type: 0x0403_0201,
            device_unique_id: 0x0807_0605,
        };
        assert_eq!(info.to_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(DeviceInfo::from_bytes(&info.to_bytes()), Some(info));
        assert_eq!(DeviceInfo::from_bytes(&[0; 7]), None);
    }
}
