//! HMAC key schedules and frame tags
//!
//! Two key schedules protect the handshake, both plain concatenations of
//! little-endian words with the pre-shared `NetworkKey`:
//!
//! ```text
//! KeyToBase   = baseNonce || networkKey                 (8 bytes)
//! KeyToDevice = childNonce || baseNonce || networkKey   (12 bytes)
//! ```
//!
//! A frame tag is the first 4 bytes of HMAC-SHA1 over the frame *excluding
//! its trailing 4 tag bytes*, read little-endian. The tag replaces those
//! bytes on send and is recomputed and compared on receive.

use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// On-wire length of a frame tag.
pub const TAG_LEN: usize = 4;

/// Build the device-to-base key for one beacon wave.
pub fn to_base_key(base_nonce: u32, network_key: u32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&base_nonce.to_le_bytes());
    key[4..].copy_from_slice(&network_key.to_le_bytes());
    key
}

/// Build the base-to-device key for one addressed device in one wave.
pub fn to_device_key(child_nonce: u32, base_nonce: u32, network_key: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&child_nonce.to_le_bytes());
    key[4..8].copy_from_slice(&base_nonce.to_le_bytes());
    key[8..].copy_from_slice(&network_key.to_le_bytes());
    key
}

/// Compute the 32-bit tag for a frame. The input covers everything except
/// the trailing [`TAG_LEN`] bytes, which hold the tag itself.
pub fn frame_tag(key: &[u8], frame: &[u8]) -> u32 {
    debug_assert!(frame.len() >= TAG_LEN);
    // HMAC accepts keys of any length; new_from_slice only fails for MACs
    // with a fixed key size.
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC-SHA1 accepts any key length");
    mac.update(&frame[..frame.len() - TAG_LEN]);
    let digest = mac.finalize().into_bytes();
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Write the tag into the trailing bytes of an outbound frame.
pub fn seal(frame: &mut [u8], key: &[u8]) {
    let tag = frame_tag(key, frame);
    let at = frame.len() - TAG_LEN;
    frame[at..].copy_from_slice(&tag.to_le_bytes());
}

/// Check the trailing tag of a received frame.
pub fn verify(frame: &[u8], key: &[u8]) -> bool {
    if frame.len() < TAG_LEN {
        return false;
    }
    let at = frame.len() - TAG_LEN;
    let claimed = u32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]]);
    frame_tag(key, frame) == claimed
}
