//! Coinstash Ingest Library
//!
//! Resilient batched loading of market-data snapshots into PostgreSQL.
//!
//! A run moves through these stages:
//!
//! - **Extract** ([`extract`]): fetch a raw snapshot, e.g. CoinGecko `/coins/markets`
//! - **Validate** ([`validate`]): check required columns and coerce rows into [`Record`]s
//! - **Chunk** ([`chunk`]): split the dataset into ordered batches
//! - **Load** ([`dispatch`], [`upsert`]): upsert every batch in its own transaction on
//!   a bounded worker pool, retrying transient connection failures ([`connection`])
//!
//! A run ends in [`LoadResult::Success`] or [`LoadResult::PartialFailure`] listing the
//! batches that did not commit. Those can be written out and replayed ([`replay`]).
//!
//! # Example
//!
//! ```no_run
//! use coinstash_ingest::{config::IngestConfig, extract::CoinGeckoExtractor, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let pipeline = Pipeline::postgres(&config);
//!     pipeline.prepare().await?;
//!
//!     let extractor = CoinGeckoExtractor::new(config.source.clone())?;
//!     let summary = pipeline.run(&extractor).await?;
//!     println!("{:?}", summary.result());
//!     Ok(())
//! }
//! ```

pub mod chunk;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod record;
pub mod replay;
pub mod schema;
pub mod store;
pub mod upsert;
pub mod validate;

pub use dispatch::{LoadReport, LoadResult};
pub use error::{IngestError, Result};
pub use pipeline::{Pipeline, ReplaySummary, RunSummary};
pub use record::{Dataset, RawDataset, Record};
