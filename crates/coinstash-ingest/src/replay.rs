//! Replay files for failed batches
//!
//! When a load ends in partial failure the rows of every failed batch can be written
//! to a JSON file and dispatched again later. Upserts are idempotent, so replaying a
//! batch that did in fact commit is harmless.

use chrono::{DateTime, Utc};
use coinstash_common::{CoinstashError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::dispatch::LoadReport;
use crate::record::{Dataset, Record};
use crate::store::UpsertStatement;
use crate::upsert::BatchJob;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayBatch {
    /// Batch index in the run that produced the file
    pub index: usize,
    pub rows: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFile {
    pub run_id: Uuid,
    pub loaded_at: DateTime<Utc>,
    pub batches: Vec<ReplayBatch>,
}

impl ReplayFile {
    /// Collect the rows of every failed batch in `report`
    ///
    /// `chunk_size` must be the one the dataset was dispatched with so that batch
    /// indices line up.
    pub fn failed_batches(
        run_id: Uuid,
        dataset: &Dataset,
        chunk_size: NonZeroUsize,
        report: &LoadReport,
    ) -> Self {
        let failed: BTreeSet<usize> = report.failed_batch_indices().into_iter().collect();

        let batches = dataset
            .batches(chunk_size)
            .filter(|batch| failed.contains(&batch.index))
            .map(|batch| ReplayBatch {
                index: batch.index,
                rows: batch.rows.to_vec(),
            })
            .collect();

        Self {
            run_id,
            loaded_at: dataset.loaded_at(),
            batches,
        }
    }

    pub fn row_count(&self) -> usize {
        self.batches.iter().map(|b| b.rows.len()).sum()
    }

    /// Keep only the batches that `report` lists as failed, under their original indices
    pub fn retain_failed(&self, report: &LoadReport) -> Self {
        let failed: BTreeSet<usize> = report.failed_batch_indices().into_iter().collect();

        Self {
            run_id: self.run_id,
            loaded_at: self.loaded_at,
            batches: self
                .batches
                .iter()
                .filter(|batch| failed.contains(&batch.index))
                .cloned()
                .collect(),
        }
    }
}

impl ReplayBatch {
    /// Owned job for this batch, keeping its index and the run's `loaded_at`
    pub fn to_job(&self, loaded_at: DateTime<Utc>, statement: Arc<UpsertStatement>) -> BatchJob {
        BatchJob {
            index: self.index,
            rows: self
                .rows
                .iter()
                .cloned()
                .map(|mut record| {
                    record.loaded_at = loaded_at;
                    record
                })
                .collect(),
            statement,
        }
    }
}

pub fn write_replay_file(path: &Path, replay: &ReplayFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, replay)?;
    writer.write_all(b"\n")?;
    writer.flush()?;

    info!(
        path = %path.display(),
        batches = replay.batches.len(),
        rows = replay.row_count(),
        "Wrote replay file"
    );
    Ok(())
}

pub fn read_replay_file(path: &Path) -> Result<ReplayFile> {
    let reader = BufReader::new(File::open(path)?);
    let replay: ReplayFile = serde_json::from_reader(reader)?;

    let mut seen = BTreeSet::new();
    if let Some(dup) = replay.batches.iter().find(|b| !seen.insert(b.index)) {
        return Err(CoinstashError::invalid_input(format!(
            "{} lists batch {} more than once",
            path.display(),
            dup.index
        )));
    }

    Ok(replay)
}
