//! # Record Types
//!
//! Typed telemetry records flowing from the normalizer into the summary engine.
//!
//! A record maps field names to a closed set of value kinds. Every record
//! handed to the summary carries `_t`, the sample time in epoch milliseconds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, VeError};

/// Reserved field holding the sample time in milliseconds since the Unix epoch
pub const TIME_FIELD: &str = "_t";

/// Reserved field holding an undecoded VE.HEX line (hex text, command nybble zero-padded)
pub const HEX_FIELD: &str = "_x";

/// A single field value
///
/// Serialized untagged: integers and floats become JSON numbers, strings JSON strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
}

/// Record after field typing
pub type Record = BTreeMap<String, Value>;

/// Record as framed off the wire, before field typing
pub type RawRecord = BTreeMap<String, String>;

// Values of different kinds are never equal, and floats compare by bit pattern,
// so a diff against `Int(5)` keeps a following `Float(5.0)`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    /// Numeric view used by mean/min/max aggregation. Strings are not numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Str(_) => None,
        }
    }

    /// Integer view used for timestamps
    ///
    /// Floats are truncated and decimal strings parsed; anything else is `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.is_finite() => Some(*v as i64),
            Value::Float(_) => None,
            Value::Str(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
        }
    }
}

/// Read the `_t` timestamp of a record
///
/// # Errors
///
/// - `MissingTimestamp` if the record has no `_t`
/// - `TimestampType` if `_t` is not convertible to a 64-bit integer
pub fn record_time(record: &Record) -> Result<i64> {
    let value = record.get(TIME_FIELD).ok_or(VeError::MissingTimestamp)?;
    value
        .as_i64()
        .ok_or_else(|| VeError::TimestampType(format!("{:?}", value)))
}

/// `_t` for records already accepted by the summary; those always carry one.
pub(crate) fn time_of(record: &Record) -> i64 {
    record_time(record).unwrap_or(0)
}
