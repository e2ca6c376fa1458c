use std::collections::HashSet;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::ProductId;
use crate::error::CrawlError;
use crate::fetcher::RecordFetcher;
use crate::product::ProductSource;
use crate::store::CheckpointStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumeMode {
    /// Skip every id already in the store.
    SkipPersisted,
    /// Skip only ids with a complete row; failed ids are fetched again.
    SkipCompleted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub total: usize,
    pub already_done: usize,
    pub remaining: usize,
    pub fetched: usize,
    pub failed: usize,
    pub batch_sizes: Vec<usize>,
}

/// Ids not yet done, in input order.
pub fn pending_ids(all_ids: &[ProductId], done: &HashSet<ProductId>) -> Vec<ProductId> {
    all_ids
        .iter()
        .copied()
        .filter(|id| !done.contains(id))
        .collect()
}

pub fn partition(todo: &[ProductId], batch_size: usize) -> Vec<&[ProductId]> {
    todo.chunks(batch_size.max(1)).collect()
}

pub struct BatchPipeline<'a, S: ProductSource> {
    fetcher: &'a RecordFetcher<S>,
    store: &'a CheckpointStore,
    batch_size: usize,
    resume: ResumeMode,
}

impl<'a, S: ProductSource> BatchPipeline<'a, S> {
    pub fn new(
        fetcher: &'a RecordFetcher<S>,
        store: &'a CheckpointStore,
        batch_size: usize,
        resume: ResumeMode,
    ) -> Self {
        Self {
            fetcher,
            store,
            batch_size,
            resume,
        }
    }

    /// Fetch every id not yet in the store, batch by batch, appending each
    /// record to the store as soon as it completes.
    pub async fn run(
        &self,
        all_ids: &[ProductId],
        sink: &dyn ProgressSink,
    ) -> Result<PipelineReport, CrawlError> {
        let done = match self.resume {
            ResumeMode::SkipPersisted => self.store.load_resume_set()?,
            ResumeMode::SkipCompleted => self.store.load_completed_set()?,
        };
        let todo = pending_ids(all_ids, &done);
        let already_done = all_ids.len() - todo.len();
        tracing::info!(
            total = all_ids.len(),
            already_done,
            remaining = todo.len(),
            "planned run"
        );
        sink.event(ProgressEvent::RunPlanned {
            total: all_ids.len(),
            already_done,
            remaining: todo.len(),
        });

        let batches = partition(&todo, self.batch_size);
        let mut report = PipelineReport {
            total: all_ids.len(),
            already_done,
            remaining: todo.len(),
            batch_sizes: batches.iter().map(|batch| batch.len()).collect(),
            ..PipelineReport::default()
        };

        for (index, batch) in batches.iter().enumerate() {
            sink.event(ProgressEvent::BatchStarted {
                batch: index + 1,
                batches: batches.len(),
                size: batch.len(),
            });

            let mut in_flight = batch
                .iter()
                .map(|&id| self.fetcher.fetch(id))
                .collect::<FuturesUnordered<_>>();
            let mut completed = 0;
            while let Some(record) = in_flight.next().await {
                self.store.append(&record)?;
                completed += 1;
                report.fetched += 1;
                if record.is_failure() {
                    report.failed += 1;
                }
                sink.event(ProgressEvent::RecordCompleted {
                    batch: index + 1,
                    completed,
                    size: batch.len(),
                });
            }
            self.store.sync()?;

            tracing::info!(batch = index + 1, size = batch.len(), "batch complete");
            sink.event(ProgressEvent::BatchFinished {
                batch: index + 1,
                size: batch.len(),
            });
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(range: std::ops::RangeInclusive<u64>) -> Vec<ProductId> {
        range.map(|id| ProductId::new(id).unwrap()).collect()
    }

    #[test]
    fn twelve_thousand_ids_make_three_batches() {
        let todo = ids(1..=12000);
        let sizes = partition(&todo, 5000)
            .iter()
            .map(|batch| batch.len())
            .collect::<Vec<_>>();
        assert_eq!(sizes, vec![5000, 5000, 2000]);
    }

    #[test]
    fn pending_preserves_order() {
        let all = ids(1..=6);
        let done = [2, 5]
            .into_iter()
            .map(|id| ProductId::new(id).unwrap())
            .collect::<HashSet<_>>();
        let pending = pending_ids(&all, &done)
            .into_iter()
            .map(ProductId::get)
            .collect::<Vec<_>>();
        assert_eq!(pending, vec![1, 3, 4, 6]);
    }
}
