//! Splitting a dataset into contiguous, ordered batches

use std::num::NonZeroUsize;
use std::slice::Chunks;
use std::sync::Arc;

use crate::record::{Dataset, Record};
use crate::store::statement::UpsertStatement;
use crate::upsert::BatchJob;

/// A contiguous slice of a dataset
///
/// Batch indices start at 1 so they line up with the log output and the
/// `failed_batch_indices` reported to operators.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch<'a> {
    pub index: usize,
    /// Position of the first row in the dataset
    pub offset: usize,
    pub rows: &'a [Record],
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Owned copy of this batch for a worker task
    pub fn to_job(&self, statement: Arc<UpsertStatement>) -> BatchJob {
        BatchJob {
            index: self.index,
            rows: self.rows.to_vec(),
            statement,
        }
    }
}

/// Iterator over the batches of a dataset, in order
pub struct Batches<'a> {
    chunks: Chunks<'a, Record>,
    chunk_size: usize,
    next_index: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Batch<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rows = self.chunks.next()?;
        let index = self.next_index;
        self.next_index += 1;

        Some(Batch {
            index,
            offset: (index - 1) * self.chunk_size,
            rows,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Batches<'_> {}

impl Dataset {
    /// Every batch has `chunk_size` rows except possibly the last one.
    /// An empty dataset yields no batches.
    pub fn batches(&self, chunk_size: NonZeroUsize) -> Batches<'_> {
        Batches {
            chunks: self.records().chunks(chunk_size.get()),
            chunk_size: chunk_size.get(),
            next_index: 1,
        }
    }

    pub fn batch_count(&self, chunk_size: NonZeroUsize) -> usize {
        self.len().div_ceil(chunk_size.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn dataset(n: usize) -> Dataset {
        let base = Utc.with_ymd_and_hms(2026, 10, 17, 0, 0, 0).unwrap();
        let records = (0..n)
            .map(|i| Record {
                id: format!("coin-{i}"),
                symbol: format!("c{i}"),
                name: format!("Coin {i}"),
                current_price: "1.5".parse().unwrap(),
                market_cap: i as i64,
                total_volume: 0,
                last_updated: base + Duration::seconds(i as i64),
                loaded_at: base,
            })
            .collect();
        Dataset::new(base, records)
    }

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_2500_rows_by_1000() {
        let data = dataset(2500);
        let batches: Vec<_> = data.batches(size(1000)).collect();

        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        assert_eq!(batches.iter().map(|b| b.index).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(batches[2].offset, 2000);
        assert_eq!(data.batch_count(size(1000)), 3);
    }

    #[test]
    fn test_batches_concatenate_back_to_dataset() {
        for (rows, chunk) in [(0, 3), (1, 1), (7, 3), (9, 3), (10, 100)] {
            let data = dataset(rows);
            let rejoined: Vec<Record> =
                data.batches(size(chunk)).flat_map(|b| b.rows.to_vec()).collect();

            assert_eq!(rejoined, data.records(), "rows={rows} chunk={chunk}");
            assert_eq!(data.batches(size(chunk)).len(), data.batch_count(size(chunk)));
            assert!(data.batches(size(chunk)).all(|b| !b.is_empty() && b.len() <= chunk));
        }
    }

    #[test]
    fn test_empty_dataset_yields_no_batches() {
        let data = dataset(0);
        assert_eq!(data.batches(size(1000)).count(), 0);
        assert_eq!(data.batch_count(size(1000)), 0);
    }
}
