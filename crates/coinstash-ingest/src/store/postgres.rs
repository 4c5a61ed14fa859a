//! PostgreSQL implementation of the store traits

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Executor};
use std::num::NonZeroUsize;
use tracing::{debug, warn};

use super::{Connect, StoreSession, UpsertStatement};
use crate::record::Record;

/// Opens one dedicated [`PgConnection`] per call. No pooling: each batch owns its
/// connection from acquisition to close.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connect for PgConnector {
    type Session = PgSession;

    async fn connect(&self) -> Result<PgSession, sqlx::Error> {
        let conn = PgConnection::connect_with(&self.options).await?;
        debug!(
            host = self.options.get_host(),
            database = self.options.get_database().unwrap_or_default(),
            "Opened store connection"
        );
        Ok(PgSession { conn })
    }
}

pub struct PgSession {
    conn: PgConnection,
}

#[async_trait]
impl StoreSession for PgSession {
    async fn write_batch(
        &mut self,
        statement: &UpsertStatement,
        rows: &[Record],
        page_size: NonZeroUsize,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.conn.begin().await?;

        match write_pages(&mut *tx, statement, rows, page_size).await {
            Ok(affected) => {
                // A failed commit drops `tx`, which queues the rollback
                tx.commit().await?;
                Ok(affected)
            },
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            },
        }
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        self.conn.execute(sql).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        self.conn.close().await
    }
}

async fn write_pages(
    conn: &mut PgConnection,
    statement: &UpsertStatement,
    rows: &[Record],
    page_size: NonZeroUsize,
) -> Result<u64, sqlx::Error> {
    let mut affected = 0;

    for (page, chunk) in rows.chunks(page_size.get()).enumerate() {
        let mut query_builder = statement.build(chunk);
        let result = query_builder.build().execute(&mut *conn).await?;
        affected += result.rows_affected();
        debug!(page = page + 1, rows = chunk.len(), "Wrote page");
    }

    Ok(affected)
}
