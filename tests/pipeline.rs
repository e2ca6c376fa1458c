use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::sync::Notify;

use prodfetch::app::{ProgressEvent, ProgressSink};
use prodfetch::domain::{ProductId, ProductPayload, Record};
use prodfetch::events::MemoryFailureLog;
use prodfetch::fetcher::{RecordFetcher, RetryPolicy};
use prodfetch::gate::ConcurrencyGate;
use prodfetch::pipeline::{BatchPipeline, ResumeMode};
use prodfetch::product::{AttemptOutcome, FailureReason, ProductSource};
use prodfetch::store::CheckpointStore;

#[derive(Clone, Default)]
struct SlowSource {
    delay: Duration,
    /// Scale the delay by the id so completions arrive one at a time.
    stagger: bool,
    not_found: HashSet<u64>,
    requested: Arc<Mutex<Vec<u64>>>,
    calls: Arc<AtomicUsize>,
}

impl SlowSource {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn requested(&self) -> Vec<u64> {
        self.requested.lock().unwrap().clone()
    }
}

impl ProductSource for SlowSource {
    async fn attempt(&self, id: ProductId) -> AttemptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().unwrap().push(id.get());
        let delay = if self.stagger {
            self.delay * id.get() as u32
        } else {
            self.delay
        };
        tokio::time::sleep(delay).await;
        if self.not_found.contains(&id.get()) {
            return AttemptOutcome::Permanent(FailureReason::Status(404));
        }
        let payload = ProductPayload {
            name: Some(format!("Product {id}")),
            ..ProductPayload::default()
        };
        AttemptOutcome::Success(Record::from_payload(id, &payload))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Signals once `limit` records have been appended.
struct StopAfter {
    limit: usize,
    completed: AtomicUsize,
    stop: Notify,
}

impl StopAfter {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            completed: AtomicUsize::new(0),
            stop: Notify::new(),
        }
    }
}

impl ProgressSink for StopAfter {
    fn event(&self, event: ProgressEvent) {
        if let ProgressEvent::RecordCompleted { .. } = event {
            if self.completed.fetch_add(1, Ordering::SeqCst) + 1 == self.limit {
                self.stop.notify_one();
            }
        }
    }
}

struct Harness {
    _temp: tempfile::TempDir,
    store: CheckpointStore,
    source: SlowSource,
    fetcher: RecordFetcher<SlowSource>,
}

impl Harness {
    fn new(source: SlowSource, concurrency: usize) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("results.tsv")).unwrap();
        let fetcher = RecordFetcher::new(
            source.clone(),
            Arc::new(ConcurrencyGate::new(concurrency)),
            RetryPolicy {
                attempts: 2,
                backoff_unit: Duration::ZERO,
            },
            Arc::new(MemoryFailureLog::new()),
        );
        Self {
            _temp: temp,
            store: CheckpointStore::new(path),
            source,
            fetcher,
        }
    }

    fn pipeline(&self, batch_size: usize, resume: ResumeMode) -> BatchPipeline<'_, SlowSource> {
        BatchPipeline::new(&self.fetcher, &self.store, batch_size, resume)
    }

    fn stored_ids(&self) -> Vec<u64> {
        self.store
            .read_records()
            .unwrap()
            .iter()
            .map(|record| record.id.get())
            .collect()
    }
}

fn ids(values: impl IntoIterator<Item = u64>) -> Vec<ProductId> {
    values
        .into_iter()
        .map(|value| ProductId::new(value).unwrap())
        .collect()
}

#[tokio::test]
async fn in_flight_never_exceeds_limit() {
    let harness = Harness::new(SlowSource::new(Duration::from_millis(5)), 4);
    let all = ids(1..=40);

    let report = harness
        .pipeline(100, ResumeMode::SkipPersisted)
        .run(&all, &RecordingSink::default())
        .await
        .unwrap();

    let stats = harness.fetcher.gate().stats();
    assert!(stats.peak <= 4, "peak {} exceeded limit", stats.peak);
    assert_eq!(stats.acquired, 40);
    assert_eq!(stats.released, 40);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(report.fetched, 40);
}

#[tokio::test]
async fn batches_run_in_order() {
    let harness = Harness::new(SlowSource::new(Duration::from_millis(1)), 3);
    let all = ids(1..=7);
    let sink = RecordingSink::default();

    let report = harness
        .pipeline(3, ResumeMode::SkipPersisted)
        .run(&all, &sink)
        .await
        .unwrap();

    assert_eq!(report.batch_sizes, vec![3, 3, 1]);
    let stored = harness.stored_ids();
    let mut first: Vec<_> = stored[..3].to_vec();
    first.sort_unstable();
    let mut second: Vec<_> = stored[3..6].to_vec();
    second.sort_unstable();
    assert_eq!(first, vec![1, 2, 3]);
    assert_eq!(second, vec![4, 5, 6]);
    assert_eq!(stored[6], 7);

    let events = sink.events.lock().unwrap();
    let started = events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::BatchStarted { batch, size, .. } => Some((*batch, *size)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(started, vec![(1, 3), (2, 3), (3, 1)]);
    assert!(events.contains(&ProgressEvent::RecordCompleted {
        batch: 3,
        completed: 1,
        size: 1,
    }));
}

#[tokio::test]
async fn second_run_fetches_nothing() {
    let harness = Harness::new(SlowSource::new(Duration::ZERO), 4);
    let all = ids(1..=10);
    let sink = RecordingSink::default();

    harness
        .pipeline(4, ResumeMode::SkipPersisted)
        .run(&all, &sink)
        .await
        .unwrap();
    let calls = harness.source.calls.load(Ordering::SeqCst);
    let report = harness
        .pipeline(4, ResumeMode::SkipPersisted)
        .run(&all, &sink)
        .await
        .unwrap();

    assert_eq!(report.already_done, 10);
    assert_eq!(report.remaining, 0);
    assert!(report.batch_sizes.is_empty());
    assert_eq!(harness.source.calls.load(Ordering::SeqCst), calls);
    assert_eq!(harness.stored_ids().len(), 10);
}

#[tokio::test]
async fn resume_fetches_only_missing_ids() {
    let harness = Harness::new(SlowSource::new(Duration::ZERO), 4);
    for value in [2, 4] {
        let id = ProductId::new(value).unwrap();
        let payload = ProductPayload {
            name: Some("earlier".to_string()),
            ..ProductPayload::default()
        };
        harness
            .store
            .append(&Record::from_payload(id, &payload))
            .unwrap();
    }

    let report = harness
        .pipeline(10, ResumeMode::SkipPersisted)
        .run(&ids(1..=5), &RecordingSink::default())
        .await
        .unwrap();

    assert_eq!(report.already_done, 2);
    let mut requested = harness.source.requested();
    requested.sort_unstable();
    assert_eq!(requested, vec![1, 3, 5]);
    let stored = harness.stored_ids().into_iter().collect::<HashSet<_>>();
    let expected = (1..=5).collect::<HashSet<u64>>();
    assert_eq!(stored, expected);
}

#[tokio::test]
async fn failures_are_persisted_and_skipped_on_resume() {
    let source = SlowSource {
        not_found: HashSet::from([3]),
        ..SlowSource::new(Duration::ZERO)
    };
    let harness = Harness::new(source, 2);
    let all = ids(1..=4);

    let report = harness
        .pipeline(10, ResumeMode::SkipPersisted)
        .run(&all, &RecordingSink::default())
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    let rerun = harness
        .pipeline(10, ResumeMode::SkipPersisted)
        .run(&all, &RecordingSink::default())
        .await
        .unwrap();
    assert_eq!(rerun.remaining, 0);

    let retry = harness
        .pipeline(10, ResumeMode::SkipCompleted)
        .run(&all, &RecordingSink::default())
        .await
        .unwrap();
    assert_eq!(retry.remaining, 1);
    assert_eq!(retry.failed, 1);
}

#[tokio::test]
async fn empty_input_fetches_nothing() {
    let harness = Harness::new(SlowSource::new(Duration::ZERO), 4);
    let report = harness
        .pipeline(10, ResumeMode::SkipPersisted)
        .run(&[], &RecordingSink::default())
        .await
        .unwrap();

    assert_eq!(report.total, 0);
    assert_eq!(report.fetched, 0);
    assert_eq!(harness.source.calls.load(Ordering::SeqCst), 0);
    assert!(!harness.store.exists());
}

#[tokio::test(start_paused = true)]
async fn interrupted_batch_resumes_from_appended_rows() {
    let source = SlowSource {
        stagger: true,
        ..SlowSource::new(Duration::from_millis(10))
    };
    let harness = Harness::new(source, 10);
    let all = ids(1..=10);
    let sink = StopAfter::new(4);
    let pipeline = harness.pipeline(10, ResumeMode::SkipPersisted);

    tokio::select! {
        biased;
        _ = sink.stop.notified() => {}
        result = pipeline.run(&all, &sink) => {
            panic!("run finished before the interruption: {result:?}");
        }
    }

    // Dropping the run released every permit it held.
    assert_eq!(harness.fetcher.gate().stats().in_flight, 0);
    let resume = harness.store.load_resume_set().unwrap();
    let mut persisted = resume.iter().map(|id| id.get()).collect::<Vec<_>>();
    persisted.sort_unstable();
    assert_eq!(persisted, vec![1, 2, 3, 4]);

    harness.source.requested.lock().unwrap().clear();
    let report = harness
        .pipeline(10, ResumeMode::SkipPersisted)
        .run(&all, &RecordingSink::default())
        .await
        .unwrap();

    assert_eq!(report.already_done, 4);
    assert_eq!(report.remaining, 6);
    let mut requested = harness.source.requested();
    requested.sort_unstable();
    assert_eq!(requested, vec![5, 6, 7, 8, 9, 10]);
    assert_eq!(harness.stored_ids().len(), 10);
}
