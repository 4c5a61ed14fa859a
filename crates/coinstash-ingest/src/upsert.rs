//! Transactional batch upsert
//!
//! One call to [`BatchUpserter::upsert`] owns a single connection from acquisition to
//! close. All pages of the batch are written inside one transaction, so a batch is
//! either fully visible or not visible at all. Failures never propagate as `Err`;
//! they come back as [`BatchOutcome::Failed`] so the dispatcher can keep going.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, debug_span, error, info, Instrument};

use crate::connection::{ConnectError, ConnectionProvider};
use crate::record::Record;
use crate::store::{Connect, StoreSession, UpsertStatement};

/// Default rows per multi-row statement
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// An owned batch handed to a worker
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub index: usize,
    pub rows: Vec<Record>,
    pub statement: Arc<UpsertStatement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient connection errors outlasted the retry policy
    ConnectionExhausted,
    /// Connection failed with a non-retryable error
    ConnectionRejected,
    /// Connected, but the transaction failed and was rolled back
    Statement,
    /// The worker task panicked or was cancelled
    WorkerPanicked,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::ConnectionExhausted => "connection retries exhausted",
            FailureKind::ConnectionRejected => "connection rejected",
            FailureKind::Statement => "statement failed",
            FailureKind::WorkerPanicked => "worker panicked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Batch {batch_index} failed ({kind}): {cause}")]
pub struct BatchFailed {
    pub batch_index: usize,
    pub kind: FailureKind,
    pub cause: String,
}

impl BatchFailed {
    pub fn from_connect(batch_index: usize, err: &ConnectError) -> Self {
        let kind = match err {
            ConnectError::Exhausted { .. } => FailureKind::ConnectionExhausted,
            ConnectError::Terminal { .. } => FailureKind::ConnectionRejected,
        };
        Self {
            batch_index,
            kind,
            cause: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    Committed { batch_index: usize, rows: usize },
    Failed(BatchFailed),
}

impl BatchOutcome {
    pub fn batch_index(&self) -> usize {
        match self {
            BatchOutcome::Committed { batch_index, .. } => *batch_index,
            BatchOutcome::Failed(failed) => failed.batch_index,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, BatchOutcome::Committed { .. })
    }
}

pub struct BatchUpserter<C> {
    provider: ConnectionProvider<C>,
    page_size: NonZeroUsize,
}

impl<C: Connect> BatchUpserter<C> {
    pub fn new(provider: ConnectionProvider<C>, page_size: NonZeroUsize) -> Self {
        Self {
            provider,
            page_size,
        }
    }

    pub fn provider(&self) -> &ConnectionProvider<C> {
        &self.provider
    }

    pub fn page_size(&self) -> NonZeroUsize {
        self.page_size
    }

    /// Write one batch in its own transaction on its own connection
    pub async fn upsert(&self, job: BatchJob) -> BatchOutcome {
        let batch_index = job.index;
        let rows = job.rows.len();

        let mut session = match self.provider.acquire().await {
            Ok(session) => session,
            Err(e) => {
                error!(batch = batch_index, rows, error = %e, "Batch failed before connecting");
                return BatchOutcome::Failed(BatchFailed::from_connect(batch_index, &e));
            },
        };

        let outcome = match session
            .write_batch(&job.statement, &job.rows, self.page_size)
            .instrument(debug_span!("batch", index = batch_index))
            .await
        {
            Ok(affected) => {
                info!(batch = batch_index, rows, affected, "Batch committed");
                BatchOutcome::Committed { batch_index, rows }
            },
            Err(e) => {
                error!(batch = batch_index, rows, error = %e, "Batch rolled back");
                BatchOutcome::Failed(BatchFailed {
                    batch_index,
                    kind: FailureKind::Statement,
                    cause: e.to_string(),
                })
            },
        };

        if let Err(e) = session.close().await {
            debug!(batch = batch_index, error = %e, "Error closing store connection");
        }

        outcome
    }
}
