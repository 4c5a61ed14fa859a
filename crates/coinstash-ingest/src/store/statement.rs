//! Upsert statement construction

use sqlx::{Postgres, QueryBuilder};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::record::Record;

/// Insert column order; bind order in [`UpsertStatement::build`] must match
pub const COLUMNS: [&str; 8] = [
    "id",
    "symbol",
    "name",
    "current_price",
    "market_cap",
    "total_volume",
    "last_updated",
    "loaded_at",
];

pub const CONFLICT_TARGET: [&str; 2] = ["id", "last_updated"];

/// PostgreSQL caps a statement at 65535 bind parameters
pub const MAX_PAGE_SIZE: usize = u16::MAX as usize / COLUMNS.len();

const MAX_IDENTIFIER_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid table name {name:?}: {reason}")]
pub struct InvalidTableName {
    pub name: String,
    pub reason: &'static str,
}

/// A validated, optionally schema-qualified table name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTable {
    schema: Option<String>,
    name: String,
}

impl TargetTable {
    pub fn parse(raw: &str) -> Result<Self, InvalidTableName> {
        let invalid = |reason| InvalidTableName {
            name: raw.to_string(),
            reason,
        };

        let (schema, name) = match raw.split_once('.') {
            Some((schema, name)) => (Some(schema), name),
            None => (None, raw),
        };

        for part in schema.iter().copied().chain(std::iter::once(name)) {
            check_identifier(part).map_err(invalid)?;
        }

        Ok(Self {
            schema: schema.map(str::to_string),
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Quoted form for use in SQL text
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{}\".\"{}\"", schema, self.name),
            None => format!("\"{}\"", self.name),
        }
    }
}

fn check_identifier(part: &str) -> Result<(), &'static str> {
    let mut chars = part.chars();
    match chars.next() {
        None => return Err("empty identifier"),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_') => {
            return Err("identifiers must start with a letter or underscore")
        },
        Some(_) => {},
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err("identifiers may only contain letters, digits and underscores");
    }
    if part.len() > MAX_IDENTIFIER_LEN {
        return Err("identifier longer than 63 bytes");
    }
    Ok(())
}

impl FromStr for TargetTable {
    type Err = InvalidTableName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The multi-row `INSERT ... ON CONFLICT (id, last_updated) DO UPDATE` for one table
///
/// The SQL text around the `VALUES` list is rendered once and shared by every worker.
#[derive(Debug, Clone)]
pub struct UpsertStatement {
    table: TargetTable,
    insert_clause: String,
    conflict_clause: String,
}

impl UpsertStatement {
    pub fn new(table: TargetTable) -> Self {
        let insert_clause = format!("INSERT INTO {} ({}) ", table.qualified(), COLUMNS.join(", "));

        let updates: Vec<String> = COLUMNS
            .iter()
            .filter(|c| !CONFLICT_TARGET.contains(*c))
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();
        let conflict_clause = format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            CONFLICT_TARGET.join(", "),
            updates.join(", ")
        );

        Self {
            table,
            insert_clause,
            conflict_clause,
        }
    }

    pub fn table(&self) -> &TargetTable {
        &self.table
    }

    /// Build the statement for one page of rows. `rows` must not be empty.
    pub fn build<'a>(&self, rows: &'a [Record]) -> QueryBuilder<'a, Postgres> {
        let mut query_builder = QueryBuilder::new(self.insert_clause.as_str());

        query_builder.push_values(rows, |mut b, record| {
            b.push_bind(&record.id)
                .push_bind(&record.symbol)
                .push_bind(&record.name)
                .push_bind(&record.current_price)
                .push_bind(record.market_cap)
                .push_bind(record.total_volume)
                .push_bind(record.last_updated)
                .push_bind(record.loaded_at);
        });

        query_builder.push(self.conflict_clause.as_str());
        query_builder
    }
}
