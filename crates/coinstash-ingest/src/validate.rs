//! Record validation and type coercion
//!
//! Turns a [`RawDataset`] into a typed [`Dataset`]. A missing column aborts the whole
//! dataset with [`SchemaError`]; a bad value only drops its own row, which is reported
//! back as a [`RejectedRow`] instead of failing the run.

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::record::{Dataset, RawDataset, RawRow, Record};

/// Columns every extracted dataset must carry
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "id",
    "symbol",
    "name",
    "current_price",
    "market_cap",
    "total_volume",
    "last_updated",
];

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("Missing required column: {column}")]
    MissingColumn { column: &'static str },
}

/// Result of coercing a timestamp cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceTimestamp {
    Parsed(DateTime<Utc>),
    /// Kept as the raw text so the row can be reported
    Unparseable(String),
}

impl SourceTimestamp {
    pub fn parsed(&self) -> Option<DateTime<Utc>> {
        match self {
            SourceTimestamp::Parsed(ts) => Some(*ts),
            SourceTimestamp::Unparseable(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    MissingField(&'static str),
    UnparseableTimestamp { column: &'static str, raw: String },
    UnparseableDecimal { column: &'static str, raw: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::MissingField(column) => write!(f, "missing value for {}", column),
            RejectReason::UnparseableTimestamp { column, raw } => {
                write!(f, "unparseable timestamp in {}: {:?}", column, raw)
            },
            RejectReason::UnparseableDecimal { column, raw } => {
                write!(f, "unparseable decimal in {}: {:?}", column, raw)
            },
        }
    }
}

/// A source row that did not survive coercion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    /// Zero-based position in the raw dataset
    pub position: usize,
    pub id: Option<String>,
    pub reason: RejectReason,
}

#[derive(Debug, Clone)]
pub struct ValidatedDataset {
    pub dataset: Dataset,
    pub rejected: Vec<RejectedRow>,
}

/// Check the column set, coerce every row and stamp the run's `loaded_at`
pub fn validate(raw: &RawDataset, loaded_at: DateTime<Utc>) -> Result<ValidatedDataset, SchemaError> {
    let columns = raw.columns();
    if let Some(column) = REQUIRED_COLUMNS.into_iter().find(|c| !columns.contains(c)) {
        return Err(SchemaError::MissingColumn { column });
    }

    let mut records = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();

    for (position, row) in raw.rows().iter().enumerate() {
        match coerce_row(row, loaded_at) {
            Ok(record) => records.push(record),
            Err(reason) => rejected.push(RejectedRow {
                position,
                id: field(row, "id").and_then(coerce_string),
                reason,
            }),
        }
    }

    if !rejected.is_empty() {
        warn!(
            dropped = rejected.len(),
            kept = records.len(),
            "Dropped rows that failed required-field checks"
        );
    }
    info!(rows = records.len(), loaded_at = %loaded_at, "Validated dataset");

    Ok(ValidatedDataset {
        dataset: Dataset::new(loaded_at, records),
        rejected,
    })
}

fn coerce_row(row: &RawRow, loaded_at: DateTime<Utc>) -> Result<Record, RejectReason> {
    let id = required_string(row, "id")?;
    let symbol = required_string(row, "symbol")?;
    let name = required_string(row, "name")?;

    let price = field(row, "current_price").ok_or(RejectReason::MissingField("current_price"))?;
    let current_price = coerce_decimal(price).ok_or_else(|| RejectReason::UnparseableDecimal {
        column: "current_price",
        raw: display_raw(price),
    })?;

    let market_cap = field(row, "market_cap").map(coerce_integer).unwrap_or(0);
    let total_volume = field(row, "total_volume").map(coerce_integer).unwrap_or(0);

    let updated = field(row, "last_updated").ok_or(RejectReason::MissingField("last_updated"))?;
    let last_updated = match coerce_timestamp(updated) {
        SourceTimestamp::Parsed(ts) => ts,
        SourceTimestamp::Unparseable(raw) => {
            return Err(RejectReason::UnparseableTimestamp {
                column: "last_updated",
                raw,
            })
        },
    };

    Ok(Record {
        id,
        symbol,
        name,
        current_price,
        market_cap,
        total_volume,
        last_updated,
        loaded_at,
    })
}

/// Present and non-null
fn field<'a>(row: &'a RawRow, column: &str) -> Option<&'a Value> {
    row.get(column).filter(|v| !v.is_null())
}

fn required_string(row: &RawRow, column: &'static str) -> Result<String, RejectReason> {
    field(row, column)
        .and_then(coerce_string)
        .filter(|s| !s.trim().is_empty())
        .ok_or(RejectReason::MissingField(column))
}

fn display_raw(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Strings pass through, scalars are rendered as text, `null` is missing
pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Numeric parse with zero for anything that is not a number
pub fn coerce_integer(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|_| i64::MAX))
            .or_else(|| n.as_f64().map(float_to_i64))
            .unwrap_or(0),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(float_to_i64))
                .unwrap_or(0)
        },
        _ => 0,
    }
}

// `as` truncates toward zero and saturates at the i64 bounds
fn float_to_i64(value: f64) -> i64 {
    value as i64
}

pub fn coerce_decimal(value: &Value) -> Option<BigDecimal> {
    match value {
        Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// RFC 3339 first, then naive date-times read as UTC
pub fn coerce_timestamp(value: &Value) -> SourceTimestamp {
    let Value::String(raw) = value else {
        return SourceTimestamp::Unparseable(display_raw(value));
    };
    let text = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return SourceTimestamp::Parsed(ts.with_timezone(&Utc));
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| SourceTimestamp::Parsed(naive.and_utc()))
        .unwrap_or_else(|| SourceTimestamp::Unparseable(raw.clone()))
}
