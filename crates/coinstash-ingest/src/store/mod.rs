//! Store access
//!
//! The load path talks to the store through two small traits so that the batch
//! upserter and dispatcher can run against PostgreSQL in production and against an
//! in-memory store in tests.
//!
//! - [`Connect`] opens a fresh connection. It is called once per attempt by the
//!   connection provider.
//! - [`StoreSession`] is one exclusively owned connection. Sessions are never shared
//!   between workers.

use async_trait::async_trait;
use std::num::NonZeroUsize;

use crate::record::Record;

pub mod postgres;
pub mod statement;

pub use postgres::{PgConnector, PgSession};
pub use statement::{InvalidTableName, TargetTable, UpsertStatement};

#[async_trait]
pub trait Connect: Send + Sync + 'static {
    type Session: StoreSession;

    async fn connect(&self) -> Result<Self::Session, sqlx::Error>;
}

#[async_trait]
pub trait StoreSession: Send + Sized + 'static {
    /// Upsert `rows` in one transaction, one multi-row statement per `page_size` rows
    ///
    /// Returns rows affected once the transaction has committed. On any error the
    /// transaction is rolled back before returning and none of the rows are visible.
    async fn write_batch(
        &mut self,
        statement: &UpsertStatement,
        rows: &[Record],
        page_size: NonZeroUsize,
    ) -> Result<u64, sqlx::Error>;

    /// Run a standalone DDL statement outside of any batch transaction
    async fn execute_ddl(&mut self, sql: &str) -> Result<(), sqlx::Error>;

    async fn close(self) -> Result<(), sqlx::Error>;
}
