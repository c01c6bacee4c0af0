//! # VE.Direct Frame Decoder
//!
//! Byte-at-a-time state machine that rebuilds text blocks and VE.HEX
//! messages from a raw serial stream.
//!
//! ```text
//! WaitHeader --\n--> InKey --\t--> InValue --\r--> WaitHeader
//!                      |
//!                      +--"Checksum"\t--> InChecksum --byte--> WaitHeader
//!
//! any state except InChecksum --:--> Hex --\n--> WaitHeader
//! ```
//!
//! Framing errors never surface to the caller: a block with a bad checksum or
//! a malformed VE.HEX line is logged and dropped, and decoding resumes at the
//! next frame boundary.

use bytes::BytesMut;
use tracing::debug;

use super::checksum::{byte_sum, hex_checksum_ok};
use super::protocol::*;
use crate::error::{Result, VeError};
use crate::record::RawRecord;

/// Longest key or value accepted before the block is abandoned
const MAX_FIELD_LEN: usize = 128;

/// Longest VE.HEX line accepted before it is abandoned
const MAX_HEX_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    WaitHeader,
    InKey,
    InValue,
    InChecksum,
    Hex,
}

/// Streaming VE.Direct frame decoder
///
/// State is fully resumable: bytes may be pushed in chunks of any size.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
    /// Running modulo-256 sum since the last checksum field
    sum: u8,
    key: BytesMut,
    value: BytesMut,
    record: RawRecord,
    /// Set when the current block lost a field; cleared at its checksum
    discard: bool,
    hex: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a decoder waiting for the first line feed
    pub fn new() -> Self {
        Self {
            state: DecoderState::WaitHeader,
            sum: 0,
            key: BytesMut::with_capacity(16),
            value: BytesMut::with_capacity(32),
            record: RawRecord::new(),
            discard: false,
            hex: BytesMut::with_capacity(64),
        }
    }

    /// Decode every complete frame found in `data`
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        data.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Advance the state machine by one byte
    ///
    /// # Returns
    ///
    /// * `Option<Frame>` - a frame completed by this byte, if any
    pub fn push(&mut self, byte: u8) -> Option<Frame> {
        // The checksum byte may take any value, including the hex marker
        if byte == VE_HEX_MARKER && self.state != DecoderState::InChecksum {
            self.start_hex();
            return None;
        }

        if self.state == DecoderState::Hex {
            return self.push_hex(byte);
        }

        self.sum = self.sum.wrapping_add(byte);
        match self.state {
            DecoderState::WaitHeader => {
                if byte == b'\n' {
                    self.state = DecoderState::InKey;
                }
                None
            }
            DecoderState::InKey => {
                if byte == VE_DELIMITER {
                    if &self.key[..] == VE_CHECKSUM_KEY {
                        self.state = DecoderState::InChecksum;
                    } else {
                        self.state = DecoderState::InValue;
                    }
                } else {
                    self.push_field_byte(byte, true);
                }
                None
            }
            DecoderState::InValue => {
                if byte == b'\r' {
                    let key = String::from_utf8_lossy(&self.key).into_owned();
                    let value = String::from_utf8_lossy(&self.value).into_owned();
                    if !self.discard {
                        self.record.insert(key, value);
                    }
                    self.key.clear();
                    self.value.clear();
                    self.state = DecoderState::WaitHeader;
                } else {
                    self.push_field_byte(byte, false);
                }
                None
            }
            DecoderState::InChecksum => self.finish_block(),
            DecoderState::Hex => None,
        }
    }

    fn push_field_byte(&mut self, byte: u8, in_key: bool) {
        let buf = if in_key { &mut self.key } else { &mut self.value };
        if buf.len() >= MAX_FIELD_LEN {
            debug!("VE.Direct field longer than {} bytes, dropping block", MAX_FIELD_LEN);
            self.abandon_block();
            self.discard = true;
            return;
        }
        buf.extend_from_slice(&[byte]);
    }

    fn finish_block(&mut self) -> Option<Frame> {
        self.key.clear();
        self.value.clear();
        self.state = DecoderState::WaitHeader;
        let sum = self.sum;
        self.sum = 0;

        if std::mem::take(&mut self.discard) {
            self.record.clear();
            return None;
        }
        if sum != 0 {
            debug!(
                "VE.Direct block checksum failed (sum 0x{:02X}), dropping {} fields",
                sum,
                self.record.len()
            );
            self.record.clear();
            return None;
        }
        if self.record.is_empty() {
            return None;
        }
        Some(Frame::Text(std::mem::take(&mut self.record)))
    }

    fn abandon_block(&mut self) {
        self.key.clear();
        self.value.clear();
        self.record.clear();
        self.state = DecoderState::WaitHeader;
    }

    fn start_hex(&mut self) {
        // A VE.HEX line abandons any partly read text block
        self.abandon_block();
        self.discard = false;
        self.hex.clear();
        self.sum = 0;
        self.state = DecoderState::Hex;
    }

    fn push_hex(&mut self, byte: u8) -> Option<Frame> {
        match byte {
            b'\n' => {
                self.state = DecoderState::WaitHeader;
                let line = String::from_utf8_lossy(&self.hex).into_owned();
                self.hex.clear();
                match decode_hex_line(&line) {
                    Ok(frame) => Some(Frame::Hex(frame)),
                    Err(e) => {
                        debug!("dropping VE.HEX line {:?}: {}", line, e);
                        None
                    }
                }
            }
            b'\r' => None,
            _ => {
                if self.hex.len() >= MAX_HEX_LEN {
                    debug!("VE.HEX line longer than {} bytes, dropping", MAX_HEX_LEN);
                    self.hex.clear();
                    self.state = DecoderState::WaitHeader;
                    return None;
                }
                self.hex.extend_from_slice(&[byte]);
                None
            }
        }
    }
}

/// Decode a VE.HEX line as read after the `:` marker
///
/// The single command nybble is zero-padded to a full byte before decoding.
pub fn decode_hex_line(line: &str) -> Result<HexFrame> {
    decode_hex_message(&format!("0{}", line.trim()))
}

/// Decode a full VE.HEX message given as even-length hex text
///
/// This is the form stored in the `_x` field of a record.
///
/// # Errors
///
/// Returns `HexProtocol` if:
/// - The text is not valid hex
/// - The decoded bytes do not sum to 0x55
/// - The command is not a register data command (0x07 or 0x0A)
/// - The message is too short to hold a register address and flags
/// - The error flags byte is non-zero
pub fn decode_hex_message(text: &str) -> Result<HexFrame> {
    let bytes = hex::decode(text)
        .map_err(|e| VeError::HexProtocol(format!("bad hex: {}", e)))?;

    if !hex_checksum_ok(&bytes) {
        return Err(VeError::HexProtocol(format!(
            "bad checksum, 0x{:02X} != 0x{:02X}",
            byte_sum(&bytes),
            VE_HEX_CHECKSUM
        )));
    }

    let command = bytes[0];
    if !is_data_command(command) {
        return Err(VeError::HexProtocol(format!(
            "command 0x{:02X} is not register data",
            command
        )));
    }

    if bytes.len() < VE_HEX_MIN_DATA_LEN {
        return Err(VeError::HexProtocol(format!(
            "message too short: {} bytes",
            bytes.len()
        )));
    }

    let flags = bytes[3];
    if flags != 0 {
        return Err(VeError::HexProtocol(format!(
            "message has error flag 0x{:02X}",
            flags
        )));
    }

    Ok(HexFrame {
        command,
        register: u16::from_le_bytes([bytes[1], bytes[2]]),
        flags,
        payload: bytes[4..bytes.len() - 1].to_vec(),
        text: text.to_string(),
    })
}
