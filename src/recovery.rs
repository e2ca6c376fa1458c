//! Turn the failure log back into an input file of ids to retry.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;

use crate::domain::ProductId;
use crate::error::CrawlError;

static FAILURE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(FAILED|EXCEPTION)\s+(\d+)")
        .unwrap_or_else(|err| panic!("invalid failure line pattern: {err}"))
});

/// Unique failed ids found in `log_path`, ascending.
pub fn extract_failed_ids(log_path: &Utf8Path) -> Result<Vec<ProductId>, CrawlError> {
    if !log_path.as_std_path().exists() {
        return Ok(Vec::new());
    }
    let file = File::open(log_path.as_std_path())
        .map_err(|err| CrawlError::FailureLog(format!("open {log_path}: {err}")))?;
    let mut ids = BTreeSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| CrawlError::FailureLog(format!("read {log_path}: {err}")))?;
        if let Some(id) = failed_id(&line) {
            ids.insert(id);
        }
    }
    Ok(ids.into_iter().collect())
}

pub fn failed_id(line: &str) -> Option<ProductId> {
    FAILURE_LINE
        .captures(line)
        .and_then(|caps| caps.get(2))
        .and_then(|id| id.as_str().parse().ok())
}

/// Write a one-column `id` CSV that `crawl --input` accepts.
pub fn write_id_file(path: &Utf8Path, ids: &[ProductId]) -> Result<(), CrawlError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CrawlError::Filesystem(err.to_string()))?;
    }
    let mut writer = csv::Writer::from_path(path.as_std_path())
        .map_err(|err| CrawlError::Filesystem(format!("create {path}: {err}")))?;
    writer
        .write_record(["id"])
        .map_err(|err| CrawlError::Filesystem(err.to_string()))?;
    for id in ids {
        writer
            .write_record([id.to_string()])
            .map_err(|err| CrawlError::Filesystem(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| CrawlError::Filesystem(err.to_string()))
}
