//! # VE.Direct Protocol Constants and Types
//!
//! Core protocol definitions for the VE.Direct text protocol and its
//! interleaved VE.HEX binary sub-protocol.
//!
//! Text blocks are a run of `\r\nKEY\tVALUE` fields closed by a
//! `\r\nChecksum\t<byte>` field. A block is valid when every byte from its
//! first `\r` through the checksum byte sums to zero modulo 256.
//!
//! VE.HEX lines start with `:`, carry a single command nybble followed by
//! hex-digit pairs, and end with `\n`.

use crate::record::RawRecord;

/// Field delimiter between key and value
pub const VE_DELIMITER: u8 = b'\t';

/// Start-of-line marker for a VE.HEX message
pub const VE_HEX_MARKER: u8 = b':';

/// Key of the field that closes a text block
pub const VE_CHECKSUM_KEY: &[u8] = b"Checksum";

/// Required byte sum of a decoded VE.HEX message (command through checksum)
pub const VE_HEX_CHECKSUM: u8 = 0x55;

/// VE.HEX command: response to a register get
pub const VE_HEX_CMD_GET_RESPONSE: u8 = 0x07;

/// VE.HEX command: asynchronously volunteered register update
pub const VE_HEX_CMD_ASYNC: u8 = 0x0A;

/// Smallest data message: command(1) + register(2) + flags(1) + checksum(1)
pub const VE_HEX_MIN_DATA_LEN: usize = 5;

/// Serial line rate used by every VE.Direct device
pub const VE_BAUD_RATE: u32 = 19_200;

/// A validated VE.HEX register data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexFrame {
    /// Command code, one of the two data commands
    pub command: u8,

    /// Register address (little-endian on the wire)
    pub register: u16,

    /// Error flags byte, always zero for an accepted frame
    pub flags: u8,

    /// Register value bytes, checksum excluded
    pub payload: Vec<u8>,

    /// Hex text of the whole message with the command nybble zero-padded,
    /// e.g. `0AD5ED00E204A3`
    pub text: String,
}

/// Output of the frame decoder
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A complete, checksum-valid text block
    Text(RawRecord),

    /// A checksum-valid VE.HEX data message
    Hex(HexFrame),
}

/// Is this a command code that carries register data?
pub fn is_data_command(command: u8) -> bool {
    command == VE_HEX_CMD_GET_RESPONSE || command == VE_HEX_CMD_ASYNC
}
