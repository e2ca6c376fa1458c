//! Terminal fetch failures and the sinks that record them.
//!
//! Each event renders to one line containing `FAILED <id>` or
//! `EXCEPTION <id>`, which is what [`crate::recovery`] greps for.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::ProductId;
use crate::error::CrawlError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTag {
    /// Non-success HTTP status.
    Failed,
    /// Transport, timeout or body-decode error.
    Exception,
}

impl fmt::Display for FailureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureTag::Failed => write!(f, "FAILED"),
            FailureTag::Exception => write!(f, "EXCEPTION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailureEvent {
    pub tag: FailureTag,
    pub id: ProductId,
    pub status: Option<u16>,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

impl FailureEvent {
    pub fn status(id: ProductId, status: u16) -> Self {
        Self {
            tag: FailureTag::Failed,
            id,
            status: Some(status),
            detail: None,
            at: Utc::now(),
        }
    }

    pub fn exception(id: ProductId, detail: impl Into<String>) -> Self {
        Self {
            tag: FailureTag::Exception,
            id,
            status: None,
            detail: Some(detail.into()),
            at: Utc::now(),
        }
    }

    /// `FAILED 123, status 404` / `EXCEPTION 123, error <detail>`
    pub fn message(&self) -> String {
        match (self.status, self.detail.as_deref()) {
            (Some(status), _) => format!("{} {}, status {status}", self.tag, self.id),
            (None, Some(detail)) => {
                // Keep the event on a single line.
                let detail = detail.split_whitespace().collect::<Vec<_>>().join(" ");
                format!("{} {}, error {detail}", self.tag, self.id)
            }
            (None, None) => format!("{} {}", self.tag, self.id),
        }
    }

    pub fn log_line(&self) -> String {
        format!(
            "{} - ERROR - {}",
            self.at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.message()
        )
    }
}

pub trait FailureLog: Send + Sync {
    fn emit(&self, event: &FailureEvent);
}

/// Appends one line per event to the error log file.
pub struct FileFailureLog {
    path: Utf8PathBuf,
    file: Mutex<File>,
}

impl FileFailureLog {
    pub fn open(path: &Utf8Path) -> Result<Self, CrawlError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| CrawlError::FailureLog(format!("{parent}: {err}")))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_std_path())
            .map_err(|err| CrawlError::FailureLog(format!("{path}: {err}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }
}

impl FailureLog for FileFailureLog {
    fn emit(&self, event: &FailureEvent) {
        tracing::warn!(id = event.id.get(), "{}", event.message());
        let Ok(mut file) = self.file.lock() else {
            tracing::error!(path = %self.path, "failure log lock poisoned");
            return;
        };
        let line = format!("{}\n", event.log_line());
        if let Err(err) = file.write_all(line.as_bytes()).and_then(|_| file.flush()) {
            tracing::error!(path = %self.path, error = %err, "failed to write failure log");
        }
    }
}

/// Keeps events in memory for callers that inspect failures after a run.
#[derive(Default)]
pub struct MemoryFailureLog {
    events: Mutex<Vec<FailureEvent>>,
}

impl MemoryFailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FailureEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl FailureLog for MemoryFailureLog {
    fn emit(&self, event: &FailureEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
