//! Target table bootstrap

use tracing::{info, warn};

use crate::connection::ConnectionProvider;
use crate::error::{IngestError, Result};
use crate::store::{Connect, StoreSession, TargetTable};

/// Idempotent DDL for the target table, keyed by `(id, last_updated)`
pub fn create_table_sql(table: &TargetTable) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {} (
    id TEXT NOT NULL,
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    current_price NUMERIC(20, 2),
    market_cap BIGINT,
    total_volume BIGINT,
    last_updated TIMESTAMPTZ NOT NULL,
    loaded_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (id, last_updated)
)"#,
        table.qualified()
    )
}

/// Create the target table if it does not exist yet
pub async fn ensure_table<C: Connect>(provider: &ConnectionProvider<C>, table: &TargetTable) -> Result<()> {
    let mut session = provider.acquire().await?;

    let result = session.execute_ddl(&create_table_sql(table)).await;
    if let Err(e) = session.close().await {
        warn!(error = %e, "Error closing store connection after schema bootstrap");
    }

    result.map_err(|source| IngestError::Bootstrap {
        table: table.to_string(),
        source,
    })?;

    info!(table = %table, "Target table is ready");
    Ok(())
}
