use std::sync::Arc;
use std::time::Duration;

use crate::config::CrawlConfig;
use crate::domain::{ProductId, Record};
use crate::events::{FailureEvent, FailureLog};
use crate::gate::ConcurrencyGate;
use crate::product::{AttemptOutcome, FailureReason, ProductSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Sleep before the next attempt after a retryable status is `unit * attempt`.
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            attempts: config.retries.max(1),
            backoff_unit: config.backoff_unit,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }
}

/// Fetches one product through the gate, retrying per [`RetryPolicy`].
///
/// Never fails: anything short of a 200 ends in [`Record::failed`], and the
/// terminal failure is reported to the [`FailureLog`] once.
pub struct RecordFetcher<S: ProductSource> {
    source: S,
    gate: Arc<ConcurrencyGate>,
    policy: RetryPolicy,
    failures: Arc<dyn FailureLog>,
}

impl<S: ProductSource> RecordFetcher<S> {
    pub fn new(
        source: S,
        gate: Arc<ConcurrencyGate>,
        policy: RetryPolicy,
        failures: Arc<dyn FailureLog>,
    ) -> Self {
        Self {
            source,
            gate,
            policy,
            failures,
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub async fn fetch(&self, id: ProductId) -> Record {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(err) => {
                self.failures.emit(&FailureEvent::exception(id, err.to_string()));
                return Record::failed(id);
            }
        };

        let mut last_failure = None;
        for attempt in 1..=self.policy.attempts {
            match self.source.attempt(id).await {
                AttemptOutcome::Success(record) => {
                    tracing::debug!(id = id.get(), attempt, "fetched");
                    return record;
                }
                AttemptOutcome::Retryable(FailureReason::Status(status)) => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(id = id.get(), attempt, status, ?delay, "retryable status");
                    last_failure = Some(FailureReason::Status(status));
                    if attempt < self.policy.attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
                AttemptOutcome::Retryable(FailureReason::Error(detail)) => {
                    tracing::warn!(id = id.get(), attempt, error = %detail, "request error");
                    last_failure = Some(FailureReason::Error(detail));
                }
                AttemptOutcome::Permanent(reason) => {
                    self.failures.emit(&terminal_event(id, reason));
                    return Record::failed(id);
                }
            }
        }

        if let Some(reason) = last_failure {
            self.failures.emit(&terminal_event(id, reason));
        }
        Record::failed(id)
    }
}

fn terminal_event(id: ProductId, reason: FailureReason) -> FailureEvent {
    match reason {
        FailureReason::Status(status) => FailureEvent::status(id, status),
        FailureReason::Error(detail) => FailureEvent::exception(id, detail),
    }
}
