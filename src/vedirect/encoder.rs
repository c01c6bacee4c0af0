//! # VE.Direct Frame Encoder
//!
//! Builds well-formed text blocks and VE.HEX lines, as a device would send them.
//! Callers can use it to write replay capture files; inside this crate it only
//! feeds the decoder tests.

use super::checksum::{hex_checksum, text_checksum};
use super::protocol::*;

/// Encode fields into a complete text block
///
/// # Arguments
///
/// * `fields` - Key/value pairs in transmission order
///
/// # Returns
///
/// * `Vec<u8>` - `\r\nKEY\tVALUE` for each field, then `\r\nChecksum\t<byte>`
///
/// # Examples
///
/// ```
/// use ve_telemetry::vedirect::encoder::encode_text_block;
/// use ve_telemetry::vedirect::checksum::byte_sum;
///
/// let block = encode_text_block(&[("V", "12800"), ("I", "150")]);
/// assert_eq!(byte_sum(&block), 0);
/// ```
pub fn encode_text_block(fields: &[(&str, &str)]) -> Vec<u8> {
    let mut block = Vec::with_capacity(fields.len() * 12 + 12);

    for (key, value) in fields {
        block.extend_from_slice(b"\r\n");
        block.extend_from_slice(key.as_bytes());
        block.push(VE_DELIMITER);
        block.extend_from_slice(value.as_bytes());
    }

    block.extend_from_slice(b"\r\n");
    block.extend_from_slice(VE_CHECKSUM_KEY);
    block.push(VE_DELIMITER);

    let checksum = text_checksum(&block);
    block.push(checksum);

    block
}

/// Encode a VE.HEX register message as a complete line
///
/// # Arguments
///
/// * `command` - Command nybble (only the low four bits are sent)
/// * `register` - Register address
/// * `flags` - Error flags byte
/// * `payload` - Little-endian register value bytes
///
/// # Returns
///
/// * `String` - `:` + command nybble + hex pairs + checksum pair + `\n`
pub fn encode_hex_message(command: u8, register: u16, flags: u8, payload: &[u8]) -> String {
    let command = command & 0x0F;
    let mut bytes = Vec::with_capacity(5 + payload.len());
    bytes.push(command);
    bytes.extend_from_slice(&register.to_le_bytes());
    bytes.push(flags);
    bytes.extend_from_slice(payload);
    bytes.push(hex_checksum(&bytes));

    format!(":{:X}{}\n", command, hex::encode_upper(&bytes[1..]))
}
