//! # Delta Codec
//!
//! Compresses a record sequence into keyframes and field-wise diffs.
//!
//! Record `i` is sent whole when `i == 0` or `i % keyframe_period == 0`;
//! otherwise only the fields that are new or changed relative to record
//! `i - 1` are sent. Removed fields are not represented: absence in a diff
//! means "unchanged".
//!
//! The codec is generic over the value type, so it serves both raw string
//! records (upload batches) and typed records (query responses).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::record::{Record, Value};

/// Diff `record` against `previous`: fields absent from `previous` or with a
/// different value
pub fn diff<V: Clone + PartialEq>(
    previous: &BTreeMap<String, V>,
    record: &BTreeMap<String, V>,
) -> BTreeMap<String, V> {
    record
        .iter()
        .filter(|(k, v)| previous.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_keyframe(index: usize, keyframe_period: usize) -> bool {
    index == 0 || (keyframe_period > 0 && index % keyframe_period == 0)
}

/// Delta-encode `records`
///
/// `previous` is an earlier encoding of a prefix of the same sequence, such
/// as a failed upload. Its entries are reused and only the remaining records
/// are encoded. When `previous` is longer than `records` it cannot be a
/// prefix encoding and everything is encoded from scratch.
///
/// A `keyframe_period` of zero means only the first record is a keyframe.
pub fn encode_deltas<V: Clone + PartialEq>(
    records: &[BTreeMap<String, V>],
    previous: &[BTreeMap<String, V>],
    keyframe_period: usize,
) -> Vec<BTreeMap<String, V>> {
    let mut out = Vec::with_capacity(records.len());
    if previous.len() <= records.len() {
        out.extend_from_slice(previous);
    }

    for i in out.len()..records.len() {
        if is_keyframe(i, keyframe_period) {
            out.push(records[i].clone());
        } else {
            out.push(diff(&records[i - 1], &records[i]));
        }
    }
    out
}

/// Rebuild full records from a delta stream, in place
pub fn rebuild_deltas<V: Clone>(deltas: &mut [BTreeMap<String, V>]) {
    let mut current: BTreeMap<String, V> = BTreeMap::new();
    for record in deltas.iter_mut() {
        for (k, v) in record.iter() {
            current.insert(k.clone(), v.clone());
        }
        record.clone_from(&current);
    }
}

/// Wire message carrying a delta stream: `{"d": [record, ...]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaMessage<V = Value> {
    #[serde(rename = "d")]
    pub data: Vec<BTreeMap<String, V>>,
}

impl<V: Clone + PartialEq> DeltaMessage<V> {
    /// Encode `records` into a message
    pub fn encode(records: &[BTreeMap<String, V>], keyframe_period: usize) -> Self {
        Self {
            data: encode_deltas(records, &[], keyframe_period),
        }
    }

    /// Rebuild the full records carried by this message
    pub fn into_full(mut self) -> Vec<BTreeMap<String, V>> {
        rebuild_deltas(&mut self.data);
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl DeltaMessage<Value> {
    /// Rebuild the typed records carried by this message
    pub fn into_records(self) -> Vec<Record> {
        self.into_full()
    }

    pub fn from_records(records: &[Record], keyframe_period: usize) -> Self {
        Self::encode(records, keyframe_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(t: i64, v: Value, extra: Option<(&str, Value)>) -> Record {
        let mut r = Record::new();
        r.insert("_t".to_string(), Value::Int(t));
        r.insert("V".to_string(), v);
        r.insert("PID".to_string(), Value::from("0xA053"));
        if let Some((k, v)) = extra {
            r.insert(k.to_string(), v);
        }
        r
    }

    fn sequence() -> Vec<Record> {
        vec![
            typed(1000, Value::Int(12_800), None),
            typed(2000, Value::Int(12_800), None),
            typed(3000, Value::Float(12_810.5), Some(("LOAD", Value::from("ON")))),
            typed(4000, Value::Int(12_790), Some(("LOAD", Value::from("ON")))),
            typed(5000, Value::Int(12_790), Some(("LOAD", Value::from("OFF")))),
        ]
    }

    #[test]
    fn test_diffs_keep_only_changes() {
        let records = sequence();
        let deltas = encode_deltas(&records, &[], 100);

        assert_eq!(deltas[0], records[0]);
        assert_eq!(deltas[1].len(), 1, "only _t changed: {:?}", deltas[1]);
        assert!(deltas[2].contains_key("V"));
        assert!(deltas[2].contains_key("LOAD"));
        assert!(!deltas[2].contains_key("PID"));
    }

    #[test]
    fn test_int_and_float_differ() {
        let a = typed(1, Value::Int(5), None);
        let b = typed(1, Value::Float(5.0), None);
        let d = diff(&a, &b);
        assert_eq!(d.get("V"), Some(&Value::Float(5.0)));
    }

    #[test]
    fn test_round_trip_for_periods() {
        let records = sequence();
        for period in [0, 1, 2, 3, 5, 100] {
            let mut deltas = encode_deltas(&records, &[], period);
            rebuild_deltas(&mut deltas);
            assert_eq!(deltas, records, "keyframe period {}", period);
        }
    }

    #[test]
    fn test_period_one_is_all_keyframes() {
        let records = sequence();
        assert_eq!(encode_deltas(&records, &[], 1), records);
    }

    #[test]
    fn test_string_records_round_trip() {
        let raw: Vec<BTreeMap<String, String>> = (0..7)
            .map(|i| {
                [("V", format!("{}", 12_800 + (i / 2) * 10)), ("CS", "3".to_string())]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect()
            })
            .collect();
        let msg = DeltaMessage::encode(&raw, 3);
        assert_eq!(msg.len(), 7);
        assert!(msg.data[1].is_empty());
        assert_eq!(msg.data[3], raw[3]);
        assert_eq!(msg.into_full(), raw);
    }

    #[test]
    fn test_regrow_from_previous_tail() {
        let records = sequence();
        let first = encode_deltas(&records[..3], &[], 2);
        let grown = encode_deltas(&records, &first, 2);
        assert_eq!(grown, encode_deltas(&records, &[], 2));

        // A longer previous encoding is ignored
        let longer = encode_deltas(&records, &[], 2);
        assert_eq!(encode_deltas(&records[..2], &longer, 2), encode_deltas(&records[..2], &[], 2));
    }

    #[test]
    fn test_wire_format() {
        let records = vec![typed(1000, Value::Float(12.5), None), typed(2000, Value::Float(12.5), None)];
        let msg = DeltaMessage::from_records(&records, 10);
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"d":[{"PID":"0xA053","V":12.5,"_t":1000},{"_t":2000}]}"#
        );

        let back: DeltaMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.into_records(), records);
    }
}
