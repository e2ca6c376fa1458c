use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;
use serde::Serialize;

use crate::domain::Record;
use crate::error::CrawlError;

static CATEGORY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(FAILED|EXCEPTION)\s+\d+(?:,\s*status\s+(\d+))?")
        .unwrap_or_else(|err| panic!("invalid category pattern: {err}"))
});

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub complete: usize,
    pub failures: usize,
    /// Complete rows that still have at least one missing field.
    pub with_missing_fields: usize,
    /// Logged terminal failures keyed by `FAILED <status>` or `EXCEPTION`.
    pub failure_categories: BTreeMap<String, usize>,
}

impl Summary {
    pub fn from_records(records: &[Record]) -> Self {
        let failures = records.iter().filter(|record| record.is_failure()).count();
        let with_missing_fields = records
            .iter()
            .filter(|record| !record.is_failure() && record.missing_count() > 0)
            .count();
        Self {
            total: records.len(),
            complete: records.len() - failures,
            failures,
            with_missing_fields,
            failure_categories: BTreeMap::new(),
        }
    }

    pub fn with_categories(mut self, categories: BTreeMap<String, usize>) -> Self {
        self.failure_categories = categories;
        self
    }
}

/// Count failure-log lines per category. A missing log has no categories.
pub fn failure_categories(log_path: &Utf8Path) -> Result<BTreeMap<String, usize>, CrawlError> {
    let mut categories = BTreeMap::new();
    if !log_path.as_std_path().exists() {
        return Ok(categories);
    }
    let file = File::open(log_path.as_std_path())
        .map_err(|err| CrawlError::FailureLog(format!("open {log_path}: {err}")))?;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| CrawlError::FailureLog(format!("read {log_path}: {err}")))?;
        if let Some(category) = category(&line) {
            *categories.entry(category).or_insert(0) += 1;
        }
    }
    Ok(categories)
}

fn category(line: &str) -> Option<String> {
    let caps = CATEGORY_LINE.captures(line)?;
    let tag = caps.get(1)?.as_str();
    Some(match caps.get(2) {
        Some(status) => format!("{tag} {}", status.as_str()),
        None => tag.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_log_lines() {
        assert_eq!(
            category("2025-01-01T00:00:00.000Z - ERROR - FAILED 12, status 404").as_deref(),
            Some("FAILED 404")
        );
        assert_eq!(
            category("2025-01-01T00:00:00.000Z - ERROR - EXCEPTION 12, error timed out")
                .as_deref(),
            Some("EXCEPTION")
        );
        assert_eq!(category("unrelated"), None);
    }
}
