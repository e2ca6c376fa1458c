use std::sync::Arc;

use camino::Utf8Path;
use serde::Serialize;

use crate::config::CrawlConfig;
use crate::dedupe::{DedupeReport, dedupe_store};
use crate::domain::ProductId;
use crate::error::CrawlError;
use crate::events::FailureLog;
use crate::fetcher::{RecordFetcher, RetryPolicy};
use crate::gate::{ConcurrencyGate, GateStats};
use crate::input::load_product_ids;
use crate::pipeline::{BatchPipeline, PipelineReport, ResumeMode};
use crate::product::ProductSource;
use crate::recovery::{extract_failed_ids, write_id_file};
use crate::store::CheckpointStore;
use crate::summary::{Summary, failure_categories};

#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub input_rows: usize,
    pub duplicates_removed: usize,
    pub pipeline: PipelineReport,
    pub dedupe: DedupeReport,
    pub gate: GateStats,
    pub summary: Summary,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoverResult {
    pub log_path: String,
    pub output_path: Option<String>,
    pub ids: Vec<ProductId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    InputLoaded {
        ids: usize,
        duplicates_removed: usize,
    },
    RunPlanned {
        total: usize,
        already_done: usize,
        remaining: usize,
    },
    BatchStarted {
        batch: usize,
        batches: usize,
        size: usize,
    },
    RecordCompleted {
        batch: usize,
        completed: usize,
        size: usize,
    },
    BatchFinished {
        batch: usize,
        size: usize,
    },
    Deduplicated {
        rows_before: usize,
        rows_after: usize,
    },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<S: ProductSource> {
    config: CrawlConfig,
    fetcher: RecordFetcher<S>,
}

impl<S: ProductSource> App<S> {
    pub fn new(
        config: CrawlConfig,
        source: S,
        failures: Arc<dyn FailureLog>,
    ) -> Result<Self, CrawlError> {
        config.validate()?;
        let gate = Arc::new(ConcurrencyGate::new(config.concurrency));
        let fetcher = RecordFetcher::new(source, gate, RetryPolicy::from_config(&config), failures);
        Ok(Self { config, fetcher })
    }

    /// Load ids from the configured input, fetch what is missing, then
    /// deduplicate and summarize the output.
    pub async fn crawl(&self, sink: &dyn ProgressSink) -> Result<CrawlResult, CrawlError> {
        let loaded = load_product_ids(&self.config.input, self.config.load_policy)?;
        sink.event(ProgressEvent::InputLoaded {
            ids: loaded.ids.len(),
            duplicates_removed: loaded.duplicates_removed,
        });
        let mut result = self.crawl_ids(&loaded.ids, sink).await?;
        result.input_rows = loaded.rows;
        result.duplicates_removed = loaded.duplicates_removed;
        Ok(result)
    }

    pub async fn crawl_ids(
        &self,
        ids: &[ProductId],
        sink: &dyn ProgressSink,
    ) -> Result<CrawlResult, CrawlError> {
        let store = CheckpointStore::new(self.config.output.clone());
        let resume = if self.config.retry_failures {
            ResumeMode::SkipCompleted
        } else {
            ResumeMode::SkipPersisted
        };
        let pipeline = BatchPipeline::new(&self.fetcher, &store, self.config.batch_size, resume);
        let report = pipeline.run(ids, sink).await?;

        let dedupe = dedupe_store(&store)?;
        sink.event(ProgressEvent::Deduplicated {
            rows_before: dedupe.rows_before,
            rows_after: dedupe.rows_after,
        });
        let summary = summarize_store(&store, &self.config.error_log)?;

        Ok(CrawlResult {
            input_rows: ids.len(),
            duplicates_removed: 0,
            pipeline: report,
            dedupe,
            gate: self.fetcher.gate().stats(),
            summary,
        })
    }
}

/// Collapse duplicate ids in the configured output.
pub fn dedupe_output(
    config: &CrawlConfig,
    sink: &dyn ProgressSink,
) -> Result<DedupeReport, CrawlError> {
    let store = CheckpointStore::new(config.output.clone());
    let report = dedupe_store(&store)?;
    sink.event(ProgressEvent::Deduplicated {
        rows_before: report.rows_before,
        rows_after: report.rows_after,
    });
    Ok(report)
}

pub fn summarize(config: &CrawlConfig) -> Result<Summary, CrawlError> {
    let store = CheckpointStore::new(config.output.clone());
    summarize_store(&store, &config.error_log)
}

/// Extract failed ids from the error log and optionally write them as an input file.
pub fn recover(config: &CrawlConfig, output: Option<&Utf8Path>) -> Result<RecoverResult, CrawlError> {
    let ids = extract_failed_ids(&config.error_log)?;
    if let Some(path) = output {
        if !ids.is_empty() {
            write_id_file(path, &ids)?;
        }
    }
    Ok(RecoverResult {
        log_path: config.error_log.to_string(),
        output_path: output
            .filter(|_| !ids.is_empty())
            .map(|path| path.to_string()),
        ids,
    })
}

fn summarize_store(store: &CheckpointStore, error_log: &Utf8Path) -> Result<Summary, CrawlError> {
    let records = store.read_records()?;
    Ok(Summary::from_records(&records).with_categories(failure_categories(error_log)?))
}
