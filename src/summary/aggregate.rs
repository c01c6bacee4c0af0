//! Per-field aggregation of a completed raw bin into one summary record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::error::VeError;
use crate::fields::FieldTable;
use crate::record::{Record, Value, HEX_FIELD};
use crate::registers::RegisterCatalog;

/// How the values of one field across a bin fold into a single value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummaryMode {
    /// Combined average of integer and float occurrences, as a float
    Mean,
    /// Value from the latest record carrying the field
    Last,
    /// Most frequent value; the earliest first occurrence wins ties
    Mode,
    Min,
    Max,
}

impl FromStr for SummaryMode {
    type Err = VeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(SummaryMode::Mean),
            "last" => Ok(SummaryMode::Last),
            "mode" => Ok(SummaryMode::Mode),
            "min" => Ok(SummaryMode::Min),
            "max" => Ok(SummaryMode::Max),
            other => Err(VeError::RegisterTable(format!(
                "unknown summary mode {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for SummaryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SummaryMode::Mean => "mean",
            SummaryMode::Last => "last",
            SummaryMode::Mode => "mode",
            SummaryMode::Min => "min",
            SummaryMode::Max => "max",
        })
    }
}

impl SummaryMode {
    /// Fold the occurrences of one field, in record order
    ///
    /// Returns `None` when nothing usable was seen, e.g. `mean` over only
    /// string values.
    pub fn fold(self, name: &str, values: &[&Value]) -> Option<Value> {
        match self {
            SummaryMode::Mean => mean(name, values),
            SummaryMode::Last => values.last().map(|v| (*v).clone()),
            SummaryMode::Mode => mode(values),
            SummaryMode::Min => extremum(name, values, f64::min),
            SummaryMode::Max => extremum(name, values, f64::max),
        }
    }
}

fn mean(name: &str, values: &[&Value]) -> Option<Value> {
    let mut isum: i64 = 0;
    let mut icount = 0usize;
    let mut fsum = 0.0;
    let mut fcount = 0usize;

    for value in values {
        match value {
            Value::Int(v) => {
                isum = isum.saturating_add(*v);
                icount += 1;
            }
            Value::Float(v) => {
                fsum += v;
                fcount += 1;
            }
            Value::Str(s) => debug!("mean of {}: ignoring non-numeric {:?}", name, s),
        }
    }

    let count = icount + fcount;
    if count == 0 {
        return None;
    }
    Some(Value::Float((isum as f64 + fsum) / count as f64))
}

fn extremum(name: &str, values: &[&Value], pick: fn(f64, f64) -> f64) -> Option<Value> {
    let mut out: Option<f64> = None;
    for value in values {
        match value.as_f64() {
            Some(v) => out = Some(out.map_or(v, |cur| pick(cur, v))),
            None => debug!("min/max of {}: ignoring non-numeric {}", name, value),
        }
    }
    out.map(Value::Float)
}

fn mode(values: &[&Value]) -> Option<Value> {
    // (value, count) in order of first appearance
    let mut counts: Vec<(&Value, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&Value, usize)> = None;
    for (value, n) in counts {
        if best.map_or(true, |(_, bn)| n > bn) {
            best = Some((value, n));
        }
    }
    best.map(|(v, _)| v.clone())
}

/// Fold a bin of records into one summary record
///
/// Text fields use the mode from `fields`. Each `_x` occurrence is resolved
/// through `catalog` and, when its register carries a summary mode, folded
/// under the register name. Fields without a mode are dropped.
pub fn summarize(records: &[Record], fields: &FieldTable, catalog: &RegisterCatalog) -> Record {
    let mut by_field: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();
    let mut by_register: BTreeMap<String, (SummaryMode, Vec<Value>)> = BTreeMap::new();

    for record in records {
        for (name, value) in record {
            if name != HEX_FIELD {
                by_field.entry(name.as_str()).or_default().push(value);
                continue;
            }
            let Some(text) = value.as_str() else {
                continue;
            };
            match catalog.decode_text(text) {
                Ok(reg) => {
                    if let Some(mode) = reg.register.summary_mode {
                        by_register
                            .entry(reg.register.name.clone())
                            .or_insert_with(|| (mode, Vec::new()))
                            .1
                            .push(Value::Int(reg.value));
                    }
                }
                Err(e) => debug!("summary skipping {}: {}", text, e),
            }
        }
    }

    let mut out = Record::new();
    for (name, values) in &by_field {
        match fields.mode(name) {
            Some(mode) => {
                if let Some(v) = mode.fold(name, values) {
                    out.insert(name.to_string(), v);
                }
            }
            None => debug!("no summary mode for {}, dropped", name),
        }
    }
    for (name, (mode, values)) in &by_register {
        let values: Vec<&Value> = values.iter().collect();
        if let Some(v) = mode.fold(name, &values) {
            out.insert(name.clone(), v);
        }
    }
    out
}
