//! End-to-end ingest run: extract, validate, chunk and load

use chrono::{SubsecRound, Utc};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::config::{IngestConfig, LoadConfig};
use crate::connection::ConnectionProvider;
use crate::dispatch::{BatchDispatcher, LoadReport, LoadResult};
use crate::error::Result;
use crate::extract::Extractor;
use crate::record::{Dataset, RawDataset};
use crate::replay::ReplayFile;
use crate::schema;
use crate::store::{Connect, PgConnector, TargetTable, UpsertStatement};
use crate::upsert::BatchUpserter;
use crate::validate::{validate, RejectedRow};

/// What one run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Rows handed over by the extractor, before validation
    pub extracted: usize,
    pub rejected: Vec<RejectedRow>,
    pub dataset: Dataset,
    pub report: LoadReport,
}

impl RunSummary {
    pub fn result(&self) -> LoadResult {
        self.report.result()
    }
}

/// What one replay did
#[derive(Debug, Clone)]
pub struct ReplaySummary {
    pub replayed: ReplayFile,
    pub report: LoadReport,
}

impl ReplaySummary {
    pub fn run_id(&self) -> Uuid {
        self.replayed.run_id
    }

    pub fn result(&self) -> LoadResult {
        self.report.result()
    }

    /// The batches that failed again, ready for another replay
    pub fn still_failing(&self) -> ReplayFile {
        self.replayed.retain_failed(&self.report)
    }
}

pub struct Pipeline<C> {
    upserter: Arc<BatchUpserter<C>>,
    dispatcher: BatchDispatcher,
    statement: Arc<UpsertStatement>,
    chunk_size: NonZeroUsize,
}

impl Pipeline<PgConnector> {
    pub fn postgres(config: &IngestConfig) -> Self {
        Self::new(&config.load, PgConnector::new(config.store.connect_options()))
    }
}

impl<C: Connect> Pipeline<C> {
    pub fn new(load: &LoadConfig, connector: C) -> Self {
        let provider = ConnectionProvider::new(connector, load.retry);
        Self {
            upserter: Arc::new(BatchUpserter::new(provider, load.page_size)),
            dispatcher: BatchDispatcher::new(load.workers),
            statement: Arc::new(UpsertStatement::new(load.table.clone())),
            chunk_size: load.chunk_size,
        }
    }

    pub fn table(&self) -> &TargetTable {
        self.statement.table()
    }

    pub fn chunk_size(&self) -> NonZeroUsize {
        self.chunk_size
    }

    /// Make sure the target table exists
    pub async fn prepare(&self) -> Result<()> {
        schema::ensure_table(self.upserter.provider(), self.table()).await
    }

    /// Chunk `dataset` and dispatch every batch
    pub async fn load(&self, dataset: &Dataset) -> LoadReport {
        let jobs = dataset
            .batches(self.chunk_size)
            .map(|batch| batch.to_job(Arc::clone(&self.statement)));

        self.dispatcher.dispatch(Arc::clone(&self.upserter), jobs).await
    }

    /// Extract a snapshot and load it
    pub async fn run<E>(&self, extractor: &E) -> Result<RunSummary>
    where
        E: Extractor + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, source = extractor.source_name());

        self.extract_and_load(run_id, extractor).instrument(span).await
    }

    async fn extract_and_load<E>(&self, run_id: Uuid, extractor: &E) -> Result<RunSummary>
    where
        E: Extractor + ?Sized,
    {
        let raw = extractor.extract().await?;
        self.validate_and_load(run_id, &raw).await
    }

    /// Load an already extracted dataset
    pub async fn run_raw(&self, raw: &RawDataset) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_run", %run_id, source = "raw");

        self.validate_and_load(run_id, raw).instrument(span).await
    }

    /// Dispatch every batch of a replay file again under its original index
    ///
    /// Batches are not re-chunked, so the replay's failures line up with the batch
    /// numbers of the run that produced the file.
    pub async fn replay(&self, replay: ReplayFile) -> ReplaySummary {
        let run_id = replay.run_id;
        let span = info_span!("ingest_run", %run_id, source = "replay");

        async move {
            info!(
                batches = replay.batches.len(),
                rows = replay.row_count(),
                "Replaying failed batches"
            );

            let jobs = replay
                .batches
                .iter()
                .map(|batch| batch.to_job(replay.loaded_at, Arc::clone(&self.statement)));
            let report = self.dispatcher.dispatch(Arc::clone(&self.upserter), jobs).await;

            ReplaySummary {
                replayed: replay,
                report,
            }
        }
        .instrument(span)
        .await
    }

    async fn validate_and_load(&self, run_id: Uuid, raw: &RawDataset) -> Result<RunSummary> {
        let start_time = Instant::now();

        // Postgres keeps microseconds
        let loaded_at = Utc::now().trunc_subsecs(6);
        let validated = validate(raw, loaded_at)?;
        let dataset = validated.dataset;

        info!(
            rows = dataset.len(),
            batches = dataset.batch_count(self.chunk_size),
            table = %self.table(),
            "Loading dataset"
        );

        let report = self.load(&dataset).await;

        info!(
            committed = report.rows_committed(),
            failed_batches = report.failed_batch_indices().len(),
            "Run finished in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );

        Ok(RunSummary {
            run_id,
            extracted: raw.len(),
            rejected: validated.rejected,
            dataset,
            report,
        })
    }
}
