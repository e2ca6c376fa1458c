use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{ProductId, RECORD_COLUMNS, Record};
use crate::error::CrawlError;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Append-only TSV of fetched records.
///
/// Rows are written one at a time and flushed before [`CheckpointStore::append`]
/// returns, so a crash loses at most the row being written. A torn row (short
/// of columns, or cut inside `missing_fields`) is skipped on read, and an
/// unterminated last line is terminated before the next append. A header torn
/// while the file was being created is rewritten; any other header is an error.
pub struct CheckpointStore {
    path: Utf8PathBuf,
    writer: Mutex<Option<File>>,
}

/// Result of reading the whole store.
#[derive(Debug, Default)]
pub struct StoreScan {
    pub records: Vec<Record>,
    /// Rows left incomplete by an interrupted write.
    pub torn_rows: usize,
    /// Complete rows that still failed to parse.
    pub malformed_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    Empty,
    Torn,
    Valid,
}

impl CheckpointStore {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().exists()
    }

    /// Ids already present in the store, whatever the row's outcome.
    pub fn load_resume_set(&self) -> Result<HashSet<ProductId>, CrawlError> {
        Ok(self
            .read_records()?
            .into_iter()
            .map(|record| record.id)
            .collect())
    }

    /// Ids with at least one complete row.
    pub fn load_completed_set(&self) -> Result<HashSet<ProductId>, CrawlError> {
        Ok(self
            .read_records()?
            .into_iter()
            .filter(|record| !record.is_failure())
            .map(|record| record.id)
            .collect())
    }

    /// Every parseable row, in file order. Missing file reads as empty.
    pub fn read_records(&self) -> Result<Vec<Record>, CrawlError> {
        Ok(self.scan()?.records)
    }

    /// Read every row, counting the ones that had to be skipped.
    pub fn scan(&self) -> Result<StoreScan, CrawlError> {
        match self.header_state()? {
            HeaderState::Empty => return Ok(StoreScan::default()),
            HeaderState::Torn => {
                tracing::warn!(path = %self.path, "store header is incomplete; no rows to read");
                return Ok(StoreScan::default());
            }
            HeaderState::Valid => {}
        }

        let file = File::open(self.path.as_std_path())
            .map_err(|err| CrawlError::Store(format!("open {}: {err}", self.path)))?;
        let reader = skip_bom(BufReader::new(file))
            .map_err(|err| CrawlError::Store(format!("read {}: {err}", self.path)))?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .from_reader(reader);

        let mut scan = StoreScan::default();
        for (index, row) in csv_reader.deserialize::<Record>().enumerate() {
            // Header is line 1.
            let row_number = index + 2;
            match row {
                Ok(record) if has_consistent_missing_fields(&record) => scan.records.push(record),
                Ok(record) => {
                    tracing::warn!(path = %self.path, row = row_number, id = record.id.get(), "skipping torn row");
                    scan.torn_rows += 1;
                }
                Err(err) if is_io_error(&err) => {
                    return Err(CrawlError::Store(format!("read {}: {err}", self.path)));
                }
                Err(err) if is_short_row(&err) => {
                    tracing::warn!(path = %self.path, row = row_number, "skipping torn row");
                    scan.torn_rows += 1;
                }
                Err(err) => {
                    tracing::warn!(path = %self.path, row = row_number, error = %err, "skipping malformed row");
                    scan.malformed_rows += 1;
                }
            }
        }
        Ok(scan)
    }

    /// Write one row, creating the file with BOM and header if needed.
    pub fn append(&self, record: &Record) -> Result<(), CrawlError> {
        let row = encode_row(record)?;
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| CrawlError::Store("store writer lock poisoned".to_string()))?;
        if guard.is_none() {
            *guard = Some(self.open_for_append()?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(CrawlError::Store("store writer unavailable".to_string()));
        };
        file.write_all(&row)
            .and_then(|_| file.flush())
            .map_err(|err| CrawlError::Store(format!("append {}: {err}", self.path)))
    }

    /// Flush appended rows to disk.
    pub fn sync(&self) -> Result<(), CrawlError> {
        let guard = self
            .writer
            .lock()
            .map_err(|_| CrawlError::Store("store writer lock poisoned".to_string()))?;
        if let Some(file) = guard.as_ref() {
            file.sync_data()
                .map_err(|err| CrawlError::Store(format!("sync {}: {err}", self.path)))?;
        }
        Ok(())
    }

    /// Replace the whole file with `records`, atomically.
    pub fn rewrite(&self, records: &[Record]) -> Result<(), CrawlError> {
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| CrawlError::Store("store writer lock poisoned".to_string()))?;
        // The append handle would point at the replaced inode.
        *guard = None;

        let parent = parent_dir(&self.path);
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CrawlError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("prodfetch-store")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| CrawlError::Filesystem(err.to_string()))?;

        let mut content = encode_head()?;
        for record in records {
            content.extend_from_slice(&encode_row(record)?);
        }
        temp.write_all(&content)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|err| CrawlError::Store(format!("write {}: {err}", temp.path().display())))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| CrawlError::Store(format!("replace {}: {err}", self.path)))?;
        Ok(())
    }

    fn open_for_append(&self) -> Result<File, CrawlError> {
        let state = self.header_state()?;
        let parent = parent_dir(&self.path);
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CrawlError::Filesystem(err.to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| CrawlError::Store(format!("open {}: {err}", self.path)))?;

        if state != HeaderState::Valid {
            if state == HeaderState::Torn {
                tracing::warn!(path = %self.path, "rewriting incomplete header");
            }
            let head = encode_head()?;
            file.set_len(0)
                .and_then(|_| file.write_all(&head))
                .and_then(|_| file.sync_data())
                .map_err(|err| CrawlError::Store(format!("write {}: {err}", self.path)))?;
            return Ok(file);
        }

        let len = file
            .metadata()
            .map_err(|err| CrawlError::Store(format!("stat {}: {err}", self.path)))?
            .len();
        if !ends_with_newline(&mut file, len)
            .map_err(|err| CrawlError::Store(format!("read {}: {err}", self.path)))?
        {
            tracing::warn!(path = %self.path, "terminating truncated last row");
            file.write_all(b"\n")
                .map_err(|err| CrawlError::Store(format!("write {}: {err}", self.path)))?;
        }
        Ok(file)
    }

    /// Classify the first line of the file against the expected header.
    fn header_state(&self) -> Result<HeaderState, CrawlError> {
        let file = match File::open(self.path.as_std_path()) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HeaderState::Empty),
            Err(err) => return Err(CrawlError::Store(format!("open {}: {err}", self.path))),
        };
        let mut first = Vec::new();
        BufReader::new(file)
            .read_until(b'\n', &mut first)
            .map_err(|err| CrawlError::Store(format!("read {}: {err}", self.path)))?;
        if first.is_empty() {
            return Ok(HeaderState::Empty);
        }

        let head = encode_head()?;
        let header = &head[UTF8_BOM.len()..];
        let line = first.strip_prefix(UTF8_BOM).unwrap_or(&first[..]);
        if line == header {
            return Ok(HeaderState::Valid);
        }
        // Without a newline the header is the whole file.
        if !first.ends_with(b"\n") && (head.starts_with(&first) || header.starts_with(line)) {
            return Ok(HeaderState::Torn);
        }
        Err(CrawlError::Store(format!(
            "{} does not start with the expected header",
            self.path
        )))
    }
}

/// A row cut inside `missing_fields` still has every column, but the list no
/// longer matches the fields that are actually empty. Failure rows may carry
/// an empty list.
fn has_consistent_missing_fields(record: &Record) -> bool {
    record.missing_fields == record.missing().join(",")
        || (record.is_failure() && record.missing_fields.is_empty())
}

fn encode_head() -> Result<Vec<u8>, CrawlError> {
    let mut head = UTF8_BOM.to_vec();
    head.extend_from_slice(&encode_header()?);
    Ok(head)
}

fn encode_header() -> Result<Vec<u8>, CrawlError> {
    let mut writer = tsv_writer();
    writer
        .write_record(RECORD_COLUMNS)
        .map_err(|err| CrawlError::Store(err.to_string()))?;
    writer
        .into_inner()
        .map_err(|err| CrawlError::Store(err.to_string()))
}

fn encode_row(record: &Record) -> Result<Vec<u8>, CrawlError> {
    let mut writer = tsv_writer();
    writer
        .serialize(record)
        .map_err(|err| CrawlError::Store(format!("encode id {}: {err}", record.id)))?;
    writer
        .into_inner()
        .map_err(|err| CrawlError::Store(err.to_string()))
}

fn tsv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new())
}

fn skip_bom<R: BufRead>(mut reader: R) -> io::Result<R> {
    let has_bom = reader.fill_buf()?.starts_with(UTF8_BOM);
    if has_bom {
        reader.consume(UTF8_BOM.len());
    }
    Ok(reader)
}

fn ends_with_newline(file: &mut File, len: u64) -> io::Result<bool> {
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn is_io_error(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(_))
}

fn is_short_row(err: &csv::Error) -> bool {
    matches!(
        err.kind(),
        csv::ErrorKind::UnequalLengths { expected_len, len, .. } if len < expected_len
    )
}

fn parent_dir(path: &Utf8Path) -> Utf8PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent.to_path_buf(),
        _ => Utf8PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> CheckpointStore {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("results.tsv")).unwrap();
        CheckpointStore::new(path)
    }

    #[test]
    fn missing_store_has_empty_resume_set() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        assert!(store.load_resume_set().unwrap().is_empty());
    }

    #[test]
    fn first_append_writes_bom_and_header() {
        let temp = tempfile::tempdir().unwrap();
        let store = store_in(&temp);
        store.append(&Record::failed(ProductId::new(7).unwrap())).unwrap();

        let bytes = fs::read(store.path().as_std_path()).unwrap();
        assert!(bytes.starts_with(UTF8_BOM));
        let text = String::from_utf8(bytes[UTF8_BOM.len()..].to_vec()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("id\tname\turl_key\tprice\tdescription\timage_url\tmissing_fields")
        );
        assert_eq!(lines.next(), Some("7\t\t\t\t\t\t"));
    }
}
