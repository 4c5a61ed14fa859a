//! Coinstash Ingest - market-data load tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use coinstash_common::logging::{init_logging, LogConfig, LogLevel};
use coinstash_ingest::config::{IngestConfig, LoadOverrides};
use coinstash_ingest::extract::CoinGeckoExtractor;
use coinstash_ingest::replay::{read_replay_file, write_replay_file, ReplayFile};
use coinstash_ingest::store::TargetTable;
use coinstash_ingest::dispatch::LoadReport;
use coinstash_ingest::{LoadResult, Pipeline};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use uuid::Uuid;

/// Exit status when some batches did not commit
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "coinstash-ingest")]
#[command(author, version, about = "Coinstash market-data ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract a market snapshot and load it
    Run {
        #[command(flatten)]
        load: LoadArgs,

        /// Write the rows of failed batches here for a later `replay`
        #[arg(long, env = "ETL_FAILED_OUT")]
        failed_out: Option<PathBuf>,
    },

    /// Load the rows of a replay file written by `run --failed-out`
    Replay {
        /// Replay file
        path: PathBuf,

        #[command(flatten)]
        load: LoadArgs,

        /// Write batches that fail again here
        #[arg(long)]
        failed_out: Option<PathBuf>,
    },

    /// Create the target table if it does not exist
    InitSchema {
        /// Target table, optionally schema-qualified
        #[arg(long)]
        table: Option<TargetTable>,
    },

    /// Print the effective configuration with secrets redacted
    CheckConfig,
}

#[derive(Args, Debug, Default)]
struct LoadArgs {
    /// Rows per batch
    #[arg(long)]
    chunk_size: Option<NonZeroUsize>,

    /// Rows per multi-row statement
    #[arg(long)]
    page_size: Option<NonZeroUsize>,

    /// Concurrent batch workers
    #[arg(long)]
    workers: Option<usize>,

    /// Target table, optionally schema-qualified
    #[arg(long)]
    table: Option<TargetTable>,

    /// Do not create the target table before loading
    #[arg(long)]
    skip_schema: bool,
}

impl LoadArgs {
    fn overrides(&self) -> LoadOverrides {
        LoadOverrides {
            table: self.table.clone(),
            chunk_size: self.chunk_size,
            page_size: self.page_size,
            workers: self.workers,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("coinstash-ingest")
        .build()
        .merge_lookup(|key| std::env::var(key).ok())?;

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Command::Run { load, failed_out } => {
            config.apply(&load.overrides())?;
            run(&config, load.skip_schema, failed_out.as_deref()).await
        },
        Command::Replay {
            path,
            load,
            failed_out,
        } => {
            config.apply(&load.overrides())?;
            replay(&config, &path, load.skip_schema, failed_out.as_deref()).await
        },
        Command::InitSchema { table } => {
            config.apply(&LoadOverrides {
                table,
                ..Default::default()
            })?;
            Pipeline::postgres(&config).prepare().await?;
            Ok(ExitCode::SUCCESS)
        },
        Command::CheckConfig => {
            println!("{config}");
            Ok(ExitCode::SUCCESS)
        },
    }
}

async fn run(config: &IngestConfig, skip_schema: bool, failed_out: Option<&Path>) -> Result<ExitCode> {
    let pipeline = Pipeline::postgres(config);
    if !skip_schema {
        pipeline.prepare().await?;
    }

    let extractor = CoinGeckoExtractor::new(config.source.clone())?;
    let summary = pipeline.run(&extractor).await?;

    if !summary.rejected.is_empty() {
        warn!(
            run_id = %summary.run_id,
            rejected = summary.rejected.len(),
            "Some source rows were rejected during validation"
        );
    }

    finish(summary.run_id, &summary.report, failed_out, || {
        ReplayFile::failed_batches(
            summary.run_id,
            &summary.dataset,
            pipeline.chunk_size(),
            &summary.report,
        )
    })
}

async fn replay(
    config: &IngestConfig,
    path: &Path,
    skip_schema: bool,
    failed_out: Option<&Path>,
) -> Result<ExitCode> {
    let replay = read_replay_file(path)
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;

    let pipeline = Pipeline::postgres(config);
    if !skip_schema {
        pipeline.prepare().await?;
    }

    let summary = pipeline.replay(replay).await;
    finish(summary.run_id(), &summary.report, failed_out, || summary.still_failing())
}

/// Log the outcome and write the failed batches to `failed_out` on partial failure
fn finish<F>(run_id: Uuid, report: &LoadReport, failed_out: Option<&Path>, failed_batches: F) -> Result<ExitCode>
where
    F: FnOnce() -> ReplayFile,
{
    match report.result() {
        LoadResult::Success => {
            info!(
                %run_id,
                rows = report.rows_committed(),
                batches = report.batch_count(),
                "Ingestion complete"
            );
            Ok(ExitCode::SUCCESS)
        },
        LoadResult::PartialFailure {
            failed_batch_indices,
        } => {
            for failed in report.failed() {
                warn!(
                    batch = failed.batch_index,
                    kind = %failed.kind,
                    cause = %failed.cause,
                    "Batch not loaded"
                );
            }

            if let Some(path) = failed_out {
                write_replay_file(path, &failed_batches())
                    .with_context(|| format!("Failed to write replay file {}", path.display()))?;
            }

            warn!(
                %run_id,
                ?failed_batch_indices,
                "Ingestion finished with partial failure"
            );
            Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
        },
    }
}
