use std::collections::HashSet;
use std::fs::File;

use camino::Utf8Path;
use serde::Serialize;

use crate::config::LoadPolicy;
use crate::domain::ProductId;
use crate::error::CrawlError;

#[derive(Debug, Clone, Serialize)]
pub struct LoadedIds {
    pub ids: Vec<ProductId>,
    pub rows: usize,
    pub duplicates_removed: usize,
}

/// `.tsv`/`.tab` files are tab-separated, everything else comma-separated.
pub fn delimiter_for(path: &Utf8Path) -> u8 {
    match path.extension().map(str::to_ascii_lowercase).as_deref() {
        Some("tsv") | Some("tab") => b'\t',
        _ => b',',
    }
}

/// Read product ids from a delimited file.
///
/// The first row is a header. The `id` column (trimmed, case-insensitive) is
/// used when present, otherwise the first column. Blank cells are skipped.
pub fn load_product_ids(path: &Utf8Path, policy: LoadPolicy) -> Result<LoadedIds, CrawlError> {
    if !path.as_std_path().exists() {
        return Err(CrawlError::InputNotFound(path.as_std_path().to_path_buf()));
    }
    let file = File::open(path.as_std_path()).map_err(|err| CrawlError::InputRead {
        path: path.as_std_path().to_path_buf(),
        message: err.to_string(),
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader.headers().map_err(|err| CrawlError::InputRead {
        path: path.as_std_path().to_path_buf(),
        message: err.to_string(),
    })?;
    let column = headers
        .iter()
        .position(|header| header.trim_start_matches('\u{feff}').trim().eq_ignore_ascii_case("id"))
        .unwrap_or(0);

    let mut ids = Vec::new();
    for (index, row) in reader.records().enumerate() {
        let row = row.map_err(|err| CrawlError::InputRead {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })?;
        let Some(value) = row.get(column).filter(|value| !value.is_empty()) else {
            continue;
        };
        let id = value
            .parse::<ProductId>()
            .map_err(|_| CrawlError::InvalidInputRow {
                path: path.as_std_path().to_path_buf(),
                row: index + 2,
                value: value.to_string(),
            })?;
        ids.push(id);
    }

    let rows = ids.len();
    let ids = match policy {
        LoadPolicy::Deduplicate => dedupe_keep_order(ids),
        LoadPolicy::KeepAll => ids,
    };
    let duplicates_removed = rows - ids.len();
    if duplicates_removed > 0 {
        tracing::warn!(%path, duplicates_removed, "removed duplicate ids at input stage");
    }
    Ok(LoadedIds {
        ids,
        rows,
        duplicates_removed,
    })
}

pub fn dedupe_keep_order(ids: Vec<ProductId>) -> Vec<ProductId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
