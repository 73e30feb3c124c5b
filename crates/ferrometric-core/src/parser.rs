//! Decoding of provider chart payloads into validated records.
//!
//! Accepted top-level shapes:
//!
//! - `{"result": {"data": [...]}}` (chart endpoint envelope)
//! - `{"data": [...]}`
//! - a bare array
//!
//! Rows are either tuples `[ts_ms, v1, v2, ...]` or objects carrying a
//! timestamp key (`timestamp`/`ts` in epoch milliseconds, `datetime`/`date` as
//! RFC3339 or `YYYY-MM-DD`) plus named value fields.
//!
//! Object rows are decoded against a field layout so that values land in the
//! same slot whatever keys a row omits. The layout is the series' pinned
//! field list, or else every key that holds a number, a numeric string or
//! `null` in some row of the payload, in first-seen order. A layout key
//! missing from a row decodes as `None`. Keys outside the layout are metadata
//! and ignored.
//!
//! A payload whose shape is not recognized is a [`ParseError`]. Bad rows are
//! dropped one by one and reported as [`Anomaly`] values.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::client_pool::RawPayload;
use crate::{FetchWindow, MetricRecord, UtcDateTime};

const MILLIS_KEYS: [&str; 2] = ["timestamp", "ts"];
const DATE_KEYS: [&str; 2] = ["datetime", "date"];

/// Payload-level decode failure. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload has no data array")]
    MissingData,

    #[error("payload data is {found}, expected an array")]
    DataNotArray { found: &'static str },
}

/// A row that was dropped while decoding a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    /// Row timestamp outside `[window.start, window.end)`.
    OutOfWindow { timestamp_ms: i64 },
    InvalidTimestamp { row: usize, detail: String },
    NonNumericValue { row: usize, timestamp_ms: i64 },
    NonFiniteValue { row: usize, timestamp_ms: i64 },
    /// Row carried no non-null value.
    EmptyValues { row: usize, timestamp_ms: i64 },
    MalformedRow { row: usize, detail: String },
    /// An earlier row with the same timestamp was replaced by a later one.
    DuplicateTimestamp { timestamp_ms: i64 },
}

impl Display for Anomaly {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfWindow { timestamp_ms } => {
                write!(f, "row at {timestamp_ms}ms is outside the requested window")
            }
            Self::InvalidTimestamp { row, detail } => {
                write!(f, "row {row} has an unreadable timestamp: {detail}")
            }
            Self::NonNumericValue { row, timestamp_ms } => {
                write!(f, "row {row} at {timestamp_ms}ms has a non-numeric value")
            }
            Self::NonFiniteValue { row, timestamp_ms } => {
                write!(f, "row {row} at {timestamp_ms}ms has a non-finite value")
            }
            Self::EmptyValues { row, timestamp_ms } => {
                write!(f, "row {row} at {timestamp_ms}ms has no values")
            }
            Self::MalformedRow { row, detail } => write!(f, "row {row} is malformed: {detail}"),
            Self::DuplicateTimestamp { timestamp_ms } => {
                write!(f, "duplicate rows at {timestamp_ms}ms, keeping the last")
            }
        }
    }
}

/// Result of decoding one payload: records sorted by timestamp plus the rows
/// that were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    pub records: Vec<MetricRecord>,
    pub anomalies: Vec<Anomaly>,
    /// Field keys backing each record's values. Empty for unpinned tuple
    /// payloads, whose fields are positional only.
    pub fields: Vec<String>,
}

/// Decode `raw` into records of `window`'s series.
pub fn parse(raw: &RawPayload, window: &FetchWindow) -> Result<ParsedBatch, ParseError> {
    let document: Value = serde_json::from_str(raw.body())
        .map_err(|error| ParseError::InvalidJson(error.to_string()))?;
    let rows = data_rows(&document)?;
    let pinned = window.series().fields();
    let fields = if pinned.is_empty() {
        keyed_layout(rows)
    } else {
        pinned.to_vec()
    };

    let mut anomalies = Vec::new();
    let mut by_timestamp: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();

    for (index, row) in rows.iter().enumerate() {
        let decoded = match row {
            Value::Array(items) => decode_tuple(index, items, pinned.len()),
            Value::Object(object) => decode_keyed(index, object, &fields),
            other => Err(Anomaly::MalformedRow {
                row: index,
                detail: format!("expected array or object, found {}", type_name(other)),
            }),
        };

        let (timestamp_ms, values) = match decoded {
            Ok(decoded) => decoded,
            Err(anomaly) => {
                anomalies.push(anomaly);
                continue;
            }
        };

        let Ok(timestamp) = UtcDateTime::from_unix_millis(timestamp_ms) else {
            anomalies.push(Anomaly::InvalidTimestamp {
                row: index,
                detail: format!("{timestamp_ms}ms is out of range"),
            });
            continue;
        };
        if !window.contains(timestamp) {
            anomalies.push(Anomaly::OutOfWindow { timestamp_ms });
            continue;
        }
        if values.iter().all(Option::is_none) {
            anomalies.push(Anomaly::EmptyValues {
                row: index,
                timestamp_ms,
            });
            continue;
        }

        if by_timestamp.insert(timestamp_ms, values).is_some() {
            anomalies.push(Anomaly::DuplicateTimestamp { timestamp_ms });
        }
    }

    let series_id = window.series().id();
    let mut records = Vec::with_capacity(by_timestamp.len());
    for (timestamp_ms, values) in by_timestamp {
        // Range was checked above.
        if let Ok(timestamp) = UtcDateTime::from_unix_millis(timestamp_ms) {
            records.push(MetricRecord {
                series_id: series_id.clone(),
                timestamp,
                fields: values,
            });
        }
    }

    Ok(ParsedBatch {
        records,
        anomalies,
        fields,
    })
}

fn data_rows(document: &Value) -> Result<&Vec<Value>, ParseError> {
    let data = match document {
        Value::Array(rows) => return Ok(rows),
        Value::Object(root) => root
            .get("result")
            .and_then(|result| result.get("data"))
            .or_else(|| root.get("data"))
            .ok_or(ParseError::MissingData)?,
        _ => return Err(ParseError::MissingData),
    };

    match data {
        Value::Array(rows) => Ok(rows),
        other => Err(ParseError::DataNotArray {
            found: type_name(other),
        }),
    }
}

/// Value keys of the payload's object rows in first-seen order.
fn keyed_layout(rows: &[Value]) -> Vec<String> {
    let mut layout: Vec<String> = Vec::new();
    for object in rows.iter().filter_map(Value::as_object) {
        for (key, item) in object {
            if is_timestamp_key(key) || layout.iter().any(|known| known == key) {
                continue;
            }
            let holds_value = match item {
                Value::Null | Value::Number(_) => true,
                Value::String(text) => text.trim().parse::<f64>().is_ok(),
                _ => false,
            };
            if holds_value {
                layout.push(key.clone());
            }
        }
    }
    layout
}

fn is_timestamp_key(key: &str) -> bool {
    MILLIS_KEYS.contains(&key) || DATE_KEYS.contains(&key)
}

fn decode_tuple(
    row: usize,
    items: &[Value],
    width: usize,
) -> Result<(i64, Vec<Option<f64>>), Anomaly> {
    let Some((first, rest)) = items.split_first() else {
        return Err(Anomaly::MalformedRow {
            row,
            detail: String::from("empty tuple"),
        });
    };
    let timestamp_ms = millis(first).ok_or_else(|| Anomaly::InvalidTimestamp {
        row,
        detail: first.to_string(),
    })?;

    // A pinned layout fixes the tuple width.
    if width != 0 && rest.len() != width {
        return Err(Anomaly::MalformedRow {
            row,
            detail: format!("expected {width} values, found {}", rest.len()),
        });
    }

    let mut values = Vec::with_capacity(rest.len());
    for item in rest {
        values.push(value(row, timestamp_ms, item)?);
    }
    Ok((timestamp_ms, values))
}

fn decode_keyed(
    row: usize,
    object: &Map<String, Value>,
    layout: &[String],
) -> Result<(i64, Vec<Option<f64>>), Anomaly> {
    let timestamp_ms = keyed_timestamp(row, object)?;

    let mut values = Vec::with_capacity(layout.len());
    for key in layout {
        match object.get(key) {
            Some(item) => values.push(value(row, timestamp_ms, item)?),
            None => values.push(None),
        }
    }
    Ok((timestamp_ms, values))
}

fn keyed_timestamp(row: usize, object: &Map<String, Value>) -> Result<i64, Anomaly> {
    for key in MILLIS_KEYS {
        if let Some(item) = object.get(key) {
            return millis(item).ok_or_else(|| Anomaly::InvalidTimestamp {
                row,
                detail: format!("{key}={item}"),
            });
        }
    }

    for key in DATE_KEYS {
        if let Some(item) = object.get(key) {
            return item
                .as_str()
                .and_then(|text| UtcDateTime::parse(text).ok())
                .map(UtcDateTime::unix_millis)
                .ok_or_else(|| Anomaly::InvalidTimestamp {
                    row,
                    detail: format!("{key}={item}"),
                });
        }
    }

    Err(Anomaly::InvalidTimestamp {
        row,
        detail: String::from("no timestamp field"),
    })
}

fn millis(item: &Value) -> Option<i64> {
    match item {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|value| value.is_finite() && value.fract() == 0.0)
                .map(|value| value as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn value(row: usize, timestamp_ms: i64, item: &Value) -> Result<Option<f64>, Anomaly> {
    let number = match item {
        Value::Null => return Ok(None),
        Value::Number(number) => number.as_f64(),
        Value::String(text) => match text.trim().parse::<f64>() {
            Ok(number) => Some(number),
            Err(_) => return Err(Anomaly::NonNumericValue { row, timestamp_ms }),
        },
        _ => return Err(Anomaly::NonNumericValue { row, timestamp_ms }),
    };

    match number {
        Some(number) if number.is_finite() => Ok(Some(number)),
        _ => Err(Anomaly::NonFiniteValue { row, timestamp_ms }),
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
