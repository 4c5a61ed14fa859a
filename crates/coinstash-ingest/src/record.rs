//! Market-data records and the datasets that carry them

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One untyped row as delivered by an extractor
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Ordered rows from a single extraction, before any validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDataset {
    rows: Vec<RawRow>,
}

impl RawDataset {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[RawRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Union of keys across all rows
    pub fn columns(&self) -> BTreeSet<&str> {
        self.rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect()
    }
}

impl From<Vec<RawRow>> for RawDataset {
    fn from(rows: Vec<RawRow>) -> Self {
        Self::new(rows)
    }
}

/// A validated market-data observation
///
/// `(id, last_updated)` is the natural key. Re-observing the same key overwrites the
/// stored row, a new `last_updated` appends history for the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub current_price: BigDecimal,
    pub market_cap: i64,
    pub total_volume: i64,
    pub last_updated: DateTime<Utc>,
    /// Assigned once per run by the validator
    pub loaded_at: DateTime<Utc>,
}

impl Record {
    pub fn natural_key(&self) -> (&str, DateTime<Utc>) {
        (&self.id, self.last_updated)
    }
}

/// Records produced by one pipeline run, all sharing the same `loaded_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    loaded_at: DateTime<Utc>,
    records: Vec<Record>,
}

impl Dataset {
    /// Build a dataset, restamping every record with `loaded_at`
    pub fn new(loaded_at: DateTime<Utc>, mut records: Vec<Record>) -> Self {
        for record in &mut records {
            record.loaded_at = loaded_at;
        }
        Self { loaded_at, records }
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}
