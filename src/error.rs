//! # Error Types
//!
//! Custom error types for VE Telemetry using `thiserror`.

use thiserror::Error;

/// Main error type for VE Telemetry
#[derive(Debug, Error)]
pub enum VeError {
    /// VE.HEX framing errors (bad hex text, checksum, command, error flag)
    #[error("VE.HEX protocol error: {0}")]
    HexProtocol(String),

    /// No loaded device family defines this register
    #[error("VE.HEX unknown register 0x{0:04X}")]
    UnknownRegister(u16),

    /// Payload shorter than the register's declared width
    #[error("VE.HEX data too short for register 0x{address:04X}: need {needed} bytes, got {got}")]
    DataTooShort {
        address: u16,
        needed: usize,
        got: usize,
    },

    /// Register width is not one of u8/u16/u32/s8/s16/s32
    #[error("VE.HEX register 0x{0:04X} has no decodable width")]
    UnsupportedWidth(u16),

    /// Record has no `_t` field
    #[error("record lacks _t time")]
    MissingTimestamp,

    /// Record `_t` field cannot be read as a 64-bit integer
    #[error("record _t is not an integer: {0}")]
    TimestampType(String),

    /// Register table parse errors
    #[error("Register table error: {0}")]
    RegisterTable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate devices could be opened
    #[error("No VE.Direct device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Outbound transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON encode/decode errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV reader errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for VE Telemetry
pub type Result<T> = std::result::Result<T, VeError>;
