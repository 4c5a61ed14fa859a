//! Shared helpers for coinstash-ingest integration tests
//!
//! [`MemoryStore`] implements the store seams in memory with transaction semantics
//! close enough to PostgreSQL for the load path: writes are staged per batch and only
//! become visible on commit. Failures can be injected per connection attempt
//! or per row id.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use coinstash_ingest::config::LoadConfig;
use coinstash_ingest::connection::RetryPolicy;
use coinstash_ingest::store::{Connect, StoreSession, TargetTable, UpsertStatement};
use coinstash_ingest::{Dataset, Record};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coinstash_ingest=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
}

pub fn record(id: &str, price: &str, last_updated: DateTime<Utc>) -> Record {
    Record {
        id: id.to_string(),
        symbol: id.chars().take(3).collect(),
        name: id.to_uppercase(),
        current_price: price.parse().unwrap(),
        market_cap: 1_000_000,
        total_volume: 50_000,
        last_updated,
        loaded_at: base_time(),
    }
}

/// `n` records with ids `coin-0` .. `coin-{n-1}`
pub fn dataset(n: usize) -> Dataset {
    let records = (0..n)
        .map(|i| record(&format!("coin-{i}"), "1.00", base_time() - Duration::seconds(i as i64)))
        .collect();
    Dataset::new(base_time(), records)
}

pub fn load_config(chunk_size: usize, page_size: usize, workers: usize) -> LoadConfig {
    LoadConfig {
        table: TargetTable::parse("crypto_price").unwrap(),
        chunk_size: NonZeroUsize::new(chunk_size).unwrap(),
        page_size: NonZeroUsize::new(page_size).unwrap(),
        workers,
        retry: RetryPolicy::default(),
    }
}

// ============================================================================
// In-memory store
// ============================================================================

type Key = (String, DateTime<Utc>);

#[derive(Default)]
struct State {
    rows: BTreeMap<Key, Record>,
    ddl: Vec<String>,
    refuse_connections: u32,
    refuse_forever: bool,
    reject_credentials: bool,
    failing_ids: BTreeSet<String>,
    panicking_ids: BTreeSet<String>,
    fail_commits: bool,
    connects: u32,
    connect_attempts: u32,
    commits: u32,
    rollbacks: u32,
    closes: u32,
    open_sessions: usize,
    max_open_sessions: usize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Refuse the next `n` connection attempts with a transient I/O error
    pub fn refuse_next_connections(&self, n: u32) {
        self.state().refuse_connections = n;
    }

    pub fn refuse_all_connections(&self) {
        self.state().refuse_forever = true;
    }

    pub fn reject_credentials(&self) {
        self.state().reject_credentials = true;
    }

    /// Any page containing a row with this id fails with a statement error
    pub fn fail_rows_with_id(&self, id: &str) {
        self.state().failing_ids.insert(id.to_string());
    }

    /// Any page containing a row with this id panics the writing task
    pub fn panic_on_id(&self, id: &str) {
        self.state().panicking_ids.insert(id.to_string());
    }

    /// Every commit fails after all pages were written
    pub fn fail_commits(&self) {
        self.state().fail_commits = true;
    }

    pub fn seed(&self, records: &[Record]) {
        let mut state = self.state();
        for record in records {
            state.rows.insert(key(record), record.clone());
        }
    }

    pub fn rows(&self) -> Vec<Record> {
        self.state().rows.values().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.state().rows.len()
    }

    pub fn get(&self, id: &str, last_updated: DateTime<Utc>) -> Option<Record> {
        self.state().rows.get(&(id.to_string(), last_updated)).cloned()
    }

    pub fn ddl(&self) -> Vec<String> {
        self.state().ddl.clone()
    }

    pub fn connects(&self) -> u32 {
        self.state().connects
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    pub fn commits(&self) -> u32 {
        self.state().commits
    }

    pub fn rollbacks(&self) -> u32 {
        self.state().rollbacks
    }

    pub fn closes(&self) -> u32 {
        self.state().closes
    }

    pub fn max_open_sessions(&self) -> usize {
        self.state().max_open_sessions
    }
}

fn key(record: &Record) -> Key {
    (record.id.clone(), record.last_updated)
}

#[async_trait]
impl Connect for MemoryStore {
    type Session = MemorySession;

    async fn connect(&self) -> Result<MemorySession, sqlx::Error> {
        let mut state = self.state();
        state.connect_attempts += 1;

        if state.reject_credentials {
            return Err(sqlx::Error::Configuration(
                "password authentication failed for user \"etl\"".into(),
            ));
        }
        if state.refuse_forever || state.refuse_connections > 0 {
            state.refuse_connections = state.refuse_connections.saturating_sub(1);
            return Err(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        state.connects += 1;
        state.open_sessions += 1;
        state.max_open_sessions = state.max_open_sessions.max(state.open_sessions);

        Ok(MemorySession { store: self.clone() })
    }
}

pub struct MemorySession {
    store: MemoryStore,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn write_batch(
        &mut self,
        _statement: &UpsertStatement,
        rows: &[Record],
        page_size: NonZeroUsize,
    ) -> Result<u64, sqlx::Error> {
        let mut staged = Vec::with_capacity(rows.len());

        for page in rows.chunks(page_size.get()) {
            // Let other workers interleave with this one
            tokio::task::yield_now().await;

            let (fails, panics) = {
                let state = self.store.state();
                (
                    page.iter().any(|r| state.failing_ids.contains(&r.id)),
                    page.iter().any(|r| state.panicking_ids.contains(&r.id)),
                )
            };

            if panics {
                panic!("injected worker panic");
            }
            if fails {
                self.store.state().rollbacks += 1;
                return Err(sqlx::Error::Protocol("injected statement failure".to_string()));
            }
            staged.extend_from_slice(page);
        }

        let mut state = self.store.state();
        if state.fail_commits {
            state.rollbacks += 1;
            return Err(sqlx::Error::Protocol("injected commit failure".to_string()));
        }

        for record in staged {
            state.rows.insert(key(&record), record);
        }
        state.commits += 1;
        Ok(rows.len() as u64)
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        self.store.state().ddl.push(sql.to_string());
        Ok(())
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        let mut state = self.store.state();
        state.closes += 1;
        state.open_sessions -= 1;
        Ok(())
    }
}
