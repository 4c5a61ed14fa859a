//! Concurrent batch dispatch
//!
//! Batches run on a bounded pool of tokio tasks. Every batch is attempted exactly
//! once per run and the dispatcher always drains the whole queue: a failed batch is
//! recorded and the run carries on.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::store::Connect;
use crate::upsert::{BatchFailed, BatchJob, BatchOutcome, BatchUpserter, FailureKind};

/// Half the available CPUs, never fewer than two
pub fn default_worker_count() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus / 2).max(2)
}

/// Aggregate result of a load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadResult {
    Success,
    PartialFailure { failed_batch_indices: Vec<usize> },
}

impl LoadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, LoadResult::Success)
    }
}

/// Per-batch outcomes of one dispatch, ordered by batch index
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    outcomes: Vec<BatchOutcome>,
}

impl LoadReport {
    pub fn new(mut outcomes: Vec<BatchOutcome>) -> Self {
        outcomes.sort_by_key(BatchOutcome::batch_index);
        Self { outcomes }
    }

    pub fn outcomes(&self) -> &[BatchOutcome] {
        &self.outcomes
    }

    pub fn batch_count(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchFailed> + '_ {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            BatchOutcome::Failed(failed) => Some(failed),
            BatchOutcome::Committed { .. } => None,
        })
    }

    pub fn failed_batch_indices(&self) -> Vec<usize> {
        self.failed().map(|f| f.batch_index).collect()
    }

    pub fn rows_committed(&self) -> usize {
        self.outcomes
            .iter()
            .map(|outcome| match outcome {
                BatchOutcome::Committed { rows, .. } => *rows,
                BatchOutcome::Failed(_) => 0,
            })
            .sum()
    }

    pub fn result(&self) -> LoadResult {
        let failed_batch_indices = self.failed_batch_indices();
        if failed_batch_indices.is_empty() {
            LoadResult::Success
        } else {
            LoadResult::PartialFailure {
                failed_batch_indices,
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BatchDispatcher {
    workers: usize,
}

impl Default for BatchDispatcher {
    fn default() -> Self {
        Self::new(default_worker_count())
    }
}

impl BatchDispatcher {
    /// `workers` is clamped to at least one
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every job, at most `workers` at a time, and wait for all of them
    ///
    /// Jobs are pulled from `jobs` only as workers free up, so a lazy iterator keeps
    /// at most `workers` owned batches alive. Each job runs on its own spawned task.
    /// A task that panics becomes a [`FailureKind::WorkerPanicked`] failure for its
    /// batch.
    pub async fn dispatch<C, I>(&self, upserter: Arc<BatchUpserter<C>>, jobs: I) -> LoadReport
    where
        C: Connect,
        I: IntoIterator<Item = BatchJob>,
        I::IntoIter: ExactSizeIterator,
    {
        let start_time = Instant::now();
        let jobs = jobs.into_iter();
        let total = jobs.len();

        info!(batches = total, workers = self.workers, "Dispatching batches");

        let outcomes: Vec<BatchOutcome> = stream::iter(jobs)
            .map(|job| {
                let upserter = Arc::clone(&upserter);
                let batch_index = job.index;

                async move {
                    match tokio::spawn(async move { upserter.upsert(job).await }).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(batch = batch_index, error = %e, "Batch worker did not finish");
                            BatchOutcome::Failed(BatchFailed {
                                batch_index,
                                kind: FailureKind::WorkerPanicked,
                                cause: e.to_string(),
                            })
                        },
                    }
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let report = LoadReport::new(outcomes);
        let failed = report.failed_batch_indices();

        if failed.is_empty() {
            info!(
                batches = total,
                rows = report.rows_committed(),
                "All batches committed in {:.2}s",
                start_time.elapsed().as_secs_f64()
            );
        } else {
            warn!(
                batches = total,
                failed = failed.len(),
                rows = report.rows_committed(),
                "Load finished with failed batches: {:?}",
                failed
            );
        }

        report
    }
}
