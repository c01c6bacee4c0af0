//! # VE.Direct Checksums
//!
//! Both halves of the protocol use a plain modulo-256 byte sum.
//!
//! **Text block**: all bytes of the block, checksum byte included, sum to `0x00`.
//! **VE.HEX**: all decoded message bytes, checksum byte included, sum to `0x55`.

use super::protocol::VE_HEX_CHECKSUM;

/// Modulo-256 sum of a byte slice
pub fn byte_sum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Checksum byte that closes a text block whose other bytes are `data`
///
/// `data` must include the trailing `\r\nChecksum\t`.
pub fn text_checksum(data: &[u8]) -> u8 {
    0u8.wrapping_sub(byte_sum(data))
}

/// Checksum byte that closes a VE.HEX message whose other decoded bytes are `data`
pub fn hex_checksum(data: &[u8]) -> u8 {
    VE_HEX_CHECKSUM.wrapping_sub(byte_sum(data))
}

/// Does a complete decoded VE.HEX message carry a valid checksum?
pub fn hex_checksum_ok(message: &[u8]) -> bool {
    byte_sum(message) == VE_HEX_CHECKSUM
}
