use serde::Serialize;

use crate::domain::{DATA_FIELDS, Record};
use crate::error::CrawlError;
use crate::store::CheckpointStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DedupeReport {
    pub rows_before: usize,
    pub rows_after: usize,
    /// Rows cut short by an interrupted write, dropped by the rewrite.
    pub torn_rows_dropped: usize,
}

impl DedupeReport {
    pub fn removed(&self) -> usize {
        self.rows_before - self.rows_after
    }
}

/// Ordering key within one id: lower is better.
///
/// An all-null failure row carries an empty `missing_fields`, so it is ranked
/// as missing every field to keep it behind any partial record.
pub fn rank(record: &Record) -> usize {
    if record.is_failure() {
        DATA_FIELDS.len()
    } else {
        record.missing_count()
    }
}

/// One record per id, ascending by id. Among duplicates the lowest [`rank`]
/// wins; ties keep the earliest row.
pub fn dedupe(mut records: Vec<Record>) -> Vec<Record> {
    // `sort_by_key` is stable, which gives the first-occurrence tie-break.
    records.sort_by_key(|record| (record.id, rank(record)));
    records.dedup_by_key(|record| record.id);
    records
}

/// Collapse the store in place.
///
/// Errors without rewriting when a row failed to parse for any reason other
/// than an interrupted write.
pub fn dedupe_store(store: &CheckpointStore) -> Result<DedupeReport, CrawlError> {
    if !store.exists() {
        return Ok(DedupeReport {
            rows_before: 0,
            rows_after: 0,
            torn_rows_dropped: 0,
        });
    }
    let scan = store.scan()?;
    if scan.malformed_rows > 0 {
        return Err(CrawlError::Store(format!(
            "{} has {} malformed rows; not rewriting",
            store.path(),
            scan.malformed_rows
        )));
    }
    let rows_before = scan.records.len();
    let deduped = dedupe(scan.records);
    let rows_after = deduped.len();
    store.rewrite(&deduped)?;
    tracing::info!(
        path = %store.path(),
        rows_before,
        rows_after,
        torn_rows_dropped = scan.torn_rows,
        "deduplicated output"
    );
    Ok(DedupeReport {
        rows_before,
        rows_after,
        torn_rows_dropped: scan.torn_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProductId;

    fn partial(id: u64, name: Option<&str>) -> Record {
        let mut record = Record::failed(ProductId::new(id).unwrap());
        record.name = name.map(str::to_string);
        record.url_key = Some(format!("key-{id}"));
        record.missing_fields = record.missing().join(",");
        record
    }

    #[test]
    fn failure_ranks_behind_partial() {
        let failed = Record::failed(ProductId::new(1).unwrap());
        let partial = partial(1, None);
        assert_eq!(rank(&failed), 5);
        assert_eq!(rank(&partial), 4);
        let kept = dedupe(vec![failed, partial.clone()]);
        assert_eq!(kept, vec![partial]);
    }

    #[test]
    fn ties_keep_first_occurrence() {
        let first = partial(3, Some("first"));
        let second = partial(3, Some("second"));
        let kept = dedupe(vec![first.clone(), second]);
        assert_eq!(kept, vec![first]);
    }
}
