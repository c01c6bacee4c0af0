//! # Text Field Normalization
//!
//! Turns the string key/value pairs of a VE.Direct text block into typed
//! values, using a static table of the fields devices are known to send.
//!
//! Each field is one of:
//! - **Integer**: parsed as base-10 `i64`; unparsable values stay strings
//! - **Text**: kept as a string (product ids, firmware versions, ON/OFF states)
//! - **Unknown**: not in the table, kept as a string
//!
//! None of these outcomes is an error. Parse failures and unknown fields are
//! reported through `tracing` only.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::record::{RawRecord, Record, Value, HEX_FIELD, TIME_FIELD};
use crate::registers::{RegisterCatalog, RegisterValue};
use crate::summary::SummaryMode;
use crate::vedirect::protocol::HexFrame;

/// How a text field's value is typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
}

/// Classification of a field name against the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    Integer,
    Text,
    Unknown,
}

/// Static description of one text-protocol field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    /// Unit as sent, possibly with a magnitude prefix (`mV`, `0.01kWh`)
    pub unit: &'static str,
    /// How the field is folded into summary bins; `None` drops it
    pub mode: Option<SummaryMode>,
}

const fn int(name: &'static str, unit: &'static str, mode: SummaryMode) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Integer, unit, mode: Some(mode) }
}

const fn text(name: &'static str, mode: Option<SummaryMode>) -> FieldSpec {
    FieldSpec { name, kind: FieldKind::Text, unit: "", mode }
}

use SummaryMode::{Last, Mean, Mode};

/// Fields sent by BMV battery monitors, MPPT chargers and Phoenix inverters
pub const STANDARD_FIELDS: &[FieldSpec] = &[
    int(TIME_FIELD, "ms", Last),
    int("V", "mV", Mean),
    int("V2", "mV", Mean),
    int("V3", "mV", Mean),
    int("VS", "mV", Mean),
    int("VM", "mV", Mean),
    int("DM", "0.1%", Mean),
    int("VPV", "mV", Mean),
    int("PPV", "W", Mean),
    int("I", "mA", Mean),
    int("I2", "mA", Mean),
    int("I3", "mA", Mean),
    int("IL", "mA", Mean),
    int("T", "C", Mean),
    int("P", "W", Mean),
    int("CE", "mAh", Last),
    int("SOC", "0.1%", Mean),
    int("TTG", "min", Last),
    int("AR", "", Mode),
    int("WARN", "", Mode),
    int("MON", "", Mode),
    int("HSDS", "", Last),
    int("AC_OUT_V", "0.01V", Mean),
    int("AC_OUT_I", "0.1A", Mean),
    int("AC_OUT_S", "VA", Mean),
    int("H1", "mAh", Last),
    int("H2", "mAh", Last),
    int("H3", "mAh", Last),
    int("H4", "", Last),
    int("H5", "", Last),
    int("H6", "mAh", Last),
    int("H7", "mV", Last),
    int("H8", "mV", Last),
    int("H9", "s", Last),
    int("H10", "", Last),
    int("H11", "", Last),
    int("H12", "", Last),
    int("H13", "", Last),
    int("H14", "", Last),
    int("H15", "mV", Last),
    int("H16", "mV", Last),
    int("H17", "0.01kWh", Last),
    int("H18", "0.01kWh", Last),
    int("H19", "0.01kWh", Last),
    int("H20", "0.01kWh", Last),
    int("H21", "W", Last),
    int("H22", "0.01kWh", Last),
    int("H23", "W", Last),
    text("LOAD", Some(Mode)),
    text("Alarm", Some(Mode)),
    text("Relay", Some(Mode)),
    text("OR", Some(Mode)),
    text("ERR", Some(Mode)),
    text("CS", Some(Mode)),
    text("MPPT", Some(Mode)),
    text("MODE", Some(Mode)),
    text("BMV", Some(Last)),
    text("FW", Some(Last)),
    text("FWE", Some(Last)),
    text("PID", Some(Last)),
    text("SER#", Some(Last)),
    // Aggregated per register, see summary
    text(HEX_FIELD, None),
];

/// Name-indexed view of a field table
#[derive(Debug, Clone)]
pub struct FieldTable {
    by_name: HashMap<&'static str, FieldSpec>,
}

impl Default for FieldTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl FieldTable {
    /// Table of the standard VE.Direct text fields
    pub fn standard() -> Self {
        Self::from_specs(STANDARD_FIELDS)
    }

    pub fn from_specs(specs: &[FieldSpec]) -> Self {
        Self {
            by_name: specs.iter().map(|s| (s.name, *s)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.by_name.get(name)
    }

    pub fn classify(&self, name: &str) -> FieldClass {
        match self.get(name).map(|s| s.kind) {
            Some(FieldKind::Integer) => FieldClass::Integer,
            Some(FieldKind::Text) => FieldClass::Text,
            None => FieldClass::Unknown,
        }
    }

    /// Summary mode of a field, if it is summarized at all
    pub fn mode(&self, name: &str) -> Option<SummaryMode> {
        self.get(name).and_then(|s| s.mode)
    }

    pub fn unit(&self, name: &str) -> Option<&'static str> {
        self.get(name).map(|s| s.unit)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Converts raw records to typed records and resolves VE.HEX frames
#[derive(Debug)]
pub struct Normalizer {
    fields: FieldTable,
    catalog: Arc<RegisterCatalog>,
    /// Unknown fields already reported once at info level
    reported_unknown: HashSet<String>,
}

impl Normalizer {
    pub fn new(fields: FieldTable, catalog: Arc<RegisterCatalog>) -> Self {
        Self {
            fields,
            catalog,
            reported_unknown: HashSet::new(),
        }
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn classify(&self, name: &str) -> FieldClass {
        self.fields.classify(name)
    }

    /// Type every field of a raw record
    pub fn normalize(&mut self, raw: &RawRecord) -> Record {
        raw.iter()
            .map(|(name, value)| (name.clone(), self.normalize_value(name, value)))
            .collect()
    }

    /// Type a single field value
    pub fn normalize_value(&mut self, name: &str, value: &str) -> Value {
        match self.fields.classify(name) {
            FieldClass::Integer => match value.trim().parse::<i64>() {
                Ok(v) => Value::Int(v),
                Err(e) => {
                    debug!("field {} value {:?} is not an integer: {}", name, value, e);
                    Value::Str(value.to_string())
                }
            },
            FieldClass::Text => Value::Str(value.to_string()),
            FieldClass::Unknown => {
                if self.reported_unknown.insert(name.to_string()) {
                    info!("unknown VE.Direct field {:?} = {:?}", name, value);
                } else {
                    debug!("unknown VE.Direct field {:?} = {:?}", name, value);
                }
                Value::Str(value.to_string())
            }
        }
    }

    /// Re-type integer fields that arrived as strings, as in received or
    /// archived wire messages
    pub fn normalize_typed(&mut self, record: &mut Record) {
        for (name, value) in record.iter_mut() {
            if let Value::Str(s) = value {
                if self.fields.classify(name) == FieldClass::Integer {
                    if let Ok(v) = s.trim().parse::<i64>() {
                        *value = Value::Int(v);
                    }
                }
            }
        }
    }

    /// Resolve a validated VE.HEX frame via the register catalog
    pub fn resolve_hex(&self, frame: &HexFrame) -> Result<RegisterValue<'_>> {
        self.catalog.decode(frame)
    }
}

/// Base units that magnitude prefixes may be stripped down to
const BASE_UNITS: &[&str] = &["V", "A", "Ah", "W", "Wh", "kWh", "VA", "%"];

/// Scale an integer reading to whole units
///
/// `m` divides by 1000, `0.1` by 10 and `0.01` by 100, and the prefix is
/// stripped from the unit. Units without a recognized prefix, or whose
/// remainder is not a known base unit (`min`), come back unchanged.
///
/// # Examples
///
/// ```
/// use ve_telemetry::fields::to_whole_units;
///
/// assert_eq!(to_whole_units(10_000, "mV"), (10.0, "V".to_string()));
/// assert_eq!(to_whole_units(100, "0.01kWh"), (1.0, "kWh".to_string()));
/// assert_eq!(to_whole_units(37, "unknownunit"), (37.0, "unknownunit".to_string()));
/// ```
pub fn to_whole_units(value: i64, unit: &str) -> (f64, String) {
    for (prefix, divisor) in [("0.01", 100.0), ("0.1", 10.0), ("m", 1000.0)] {
        if let Some(base) = unit.strip_prefix(prefix) {
            if BASE_UNITS.contains(&base) {
                return (value as f64 / divisor, base.to_string());
            }
        }
    }
    (value as f64, unit.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::new(
            FieldTable::standard(),
            Arc::new(RegisterCatalog::builtin().unwrap()),
        )
    }

    fn raw(pairs: &[(&str, &str)]) -> RawRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_field_table_sizes() {
        let table = FieldTable::standard();
        let ints = STANDARD_FIELDS.iter().filter(|s| s.kind == FieldKind::Integer).count();
        let texts = STANDARD_FIELDS.iter().filter(|s| s.kind == FieldKind::Text).count();
        assert!(ints >= 20, "expected more integer fields, got {}", ints);
        assert!(texts >= 10, "expected more text fields, got {}", texts);
        assert_eq!(table.len(), STANDARD_FIELDS.len(), "field names must be unique");
    }

    #[test]
    fn test_classify() {
        let n = normalizer();
        assert_eq!(n.classify("V"), FieldClass::Integer);
        assert_eq!(n.classify("_t"), FieldClass::Integer);
        assert_eq!(n.classify("PID"), FieldClass::Text);
        assert_eq!(n.classify("_x"), FieldClass::Text);
        assert_eq!(n.classify("XYZZY"), FieldClass::Unknown);
    }

    #[test]
    fn test_normalize_record() {
        let mut n = normalizer();
        let rec = n.normalize(&raw(&[
            ("_t", "1700000000000"),
            ("V", "12800"),
            ("I", "-320"),
            ("PID", "0xA053"),
            ("CS", "3"),
            ("LOAD", "ON"),
            ("NEWFIELD", "42"),
        ]));

        assert_eq!(rec["_t"], Value::Int(1_700_000_000_000));
        assert_eq!(rec["V"], Value::Int(12800));
        assert_eq!(rec["I"], Value::Int(-320));
        assert_eq!(rec["PID"], Value::from("0xA053"));
        assert_eq!(rec["CS"], Value::from("3"));
        assert_eq!(rec["LOAD"], Value::from("ON"));
        assert_eq!(rec["NEWFIELD"], Value::from("42"));
    }

    #[test]
    fn test_bad_integer_kept_as_string() {
        let mut n = normalizer();
        assert_eq!(n.normalize_value("V", "12.8"), Value::from("12.8"));
        assert_eq!(n.normalize_value("V", "---"), Value::from("---"));
    }

    #[test]
    fn test_unknown_field_reported_once() {
        let mut n = normalizer();
        n.normalize_value("FOO", "1");
        n.normalize_value("FOO", "2");
        assert_eq!(n.reported_unknown.len(), 1);
    }

    #[test]
    fn test_normalize_typed() {
        let mut n = normalizer();
        let mut rec = Record::new();
        rec.insert("V".to_string(), Value::from("12800"));
        rec.insert("PID".to_string(), Value::from("0xA053"));
        rec.insert("I".to_string(), Value::Int(5));
        rec.insert("P".to_string(), Value::Float(3.5));

        n.normalize_typed(&mut rec);
        assert_eq!(rec["V"], Value::Int(12800));
        assert_eq!(rec["PID"], Value::from("0xA053"));
        assert_eq!(rec["I"], Value::Int(5));
        assert_eq!(rec["P"], Value::Float(3.5));
    }

    #[test]
    fn test_resolve_hex() {
        let n = normalizer();
        let frame = crate::vedirect::decoder::decode_hex_message("0AD5ED00E204A3").unwrap();
        let value = n.resolve_hex(&frame).unwrap();
        assert_eq!(value.register.name, "charger_voltage");
        assert_eq!(value.value, 1250);
    }

    #[test]
    fn test_whole_units() {
        let cases: &[(i64, &str, f64, &str)] = &[
            (10_000, "mV", 10.0, "V"),
            (37, "unknownunit", 37.0, "unknownunit"),
            (10_000, "mAh", 10.0, "Ah"),
            (37, "", 37.0, ""),
            (100, "0.1A", 10.0, "A"),
            (100, "0.01kWh", 1.0, "kWh"),
            (1_000, "0.01V", 10.0, "V"),
            (55, "min", 55.0, "min"),
            (875, "0.1%", 87.5, "%"),
        ];
        for (i, &(v, unit, fv, fu)) in cases.iter().enumerate() {
            let (got_v, got_u) = to_whole_units(v, unit);
            assert_eq!((got_v, got_u.as_str()), (fv, fu), "case {}: ({}, {})", i, v, unit);
        }
    }

    #[test]
    fn test_field_units_from_table() {
        let table = FieldTable::standard();
        assert_eq!(table.unit("V"), Some("mV"));
        assert_eq!(table.unit("H19"), Some("0.01kWh"));
        assert_eq!(table.unit("nope"), None);
        assert_eq!(table.mode("H19"), Some(SummaryMode::Last));
        assert_eq!(table.mode("_x"), None);
    }
}
