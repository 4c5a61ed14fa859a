//! Errors that abort a whole run
//!
//! Per-batch failures are not errors at this level. They are reported as
//! [`crate::upsert::BatchFailed`] inside a [`crate::dispatch::LoadReport`].

use thiserror::Error;

use crate::config::ConfigError;
use crate::connection::ConnectError;
use crate::extract::ExtractError;
use crate::validate::SchemaError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Failed to create table {table}: {source}")]
    Bootstrap {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Replay file error: {0}")]
    Replay(#[from] coinstash_common::CoinstashError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
