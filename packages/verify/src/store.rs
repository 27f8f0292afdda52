//! Durable progress snapshots.
//!
//! The snapshot is a CSV with header `code,found,product_name,source`.
//! It is rewritten in full at every checkpoint: the rows go to a sibling
//! `*.tmp` file which is synced and then renamed over the target, so a
//! crash mid-write leaves the previous snapshot intact.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use upc_verify_models::{
    ProgressTable, RATE_LIMITED_TAG, VerificationRecord, VerificationStatus,
};

/// Errors from reading or writing a progress snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error on the snapshot or its temp file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// CSV error while reading the snapshot.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// Path to the snapshot.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// A snapshot row that cannot be turned into a record.
    #[error("Malformed progress row in {path} at line {line}: {message}")]
    Malformed {
        /// Path to the snapshot.
        path: String,
        /// One-based line number.
        line: u64,
        /// What was wrong.
        message: String,
    },
}

/// Loads and saves the progress table.
pub trait ProgressStore: Send + Sync {
    /// Reads the last saved table. A store with nothing saved yields an
    /// empty table.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot exists but cannot be read.
    fn load(&self) -> Result<ProgressTable, StoreError>;

    /// Replaces the saved table with `table`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the snapshot cannot be written. The
    /// previous snapshot is left untouched in that case.
    fn save(&self, table: &ProgressTable) -> Result<(), StoreError>;
}

/// One line of the snapshot.
///
/// Older snapshots used title-case headers; both are accepted on load.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRow {
    #[serde(alias = "UPC")]
    code: String,
    #[serde(alias = "Found")]
    found: String,
    #[serde(alias = "Product Name", default)]
    product_name: String,
    #[serde(alias = "Source", default)]
    source: String,
}

impl SnapshotRow {
    fn from_record(record: &VerificationRecord) -> Self {
        Self {
            code: record.code.clone(),
            found: record.is_verified().to_string(),
            product_name: record.product_name.clone(),
            source: record.source.clone(),
        }
    }

    fn into_record(self) -> Result<VerificationRecord, String> {
        let code = self.code.trim();
        if code.is_empty() {
            return Err("empty code".to_string());
        }

        let found = match self.found.trim().to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            other => return Err(format!("found must be true or false, got {other:?}")),
        };

        if found {
            return Ok(VerificationRecord::verified(
                code,
                self.product_name,
                self.source,
            ));
        }

        if self.source.starts_with(RATE_LIMITED_TAG) {
            return Ok(VerificationRecord {
                code: code.to_string(),
                status: VerificationStatus::NotChecked,
                product_name: self.product_name,
                source: self.source,
            });
        }

        // Older snapshots flagged rate limits in the name or source column.
        if mentions_rate_limit(&self.product_name) || mentions_rate_limit(&self.source) {
            let source = self.source.trim();
            let source_id = if source.is_empty() || mentions_rate_limit(source) {
                "unknown"
            } else {
                source
            };
            return Ok(VerificationRecord::rate_limited(code, source_id));
        }

        Ok(VerificationRecord {
            code: code.to_string(),
            status: VerificationStatus::NotFound,
            product_name: self.product_name,
            source: self.source,
        })
    }
}

fn mentions_rate_limit(value: &str) -> bool {
    value.to_ascii_lowercase().contains("rate limit")
}

/// Progress snapshot kept in a CSV file.
#[derive(Debug, Clone)]
pub struct CsvProgressStore {
    path: PathBuf,
}

impl CsvProgressStore {
    /// Creates a store backed by `path`. Nothing is read until
    /// [`ProgressStore::load`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn csv_error(&self, source: csv::Error) -> StoreError {
        StoreError::Csv {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl ProgressStore for CsvProgressStore {
    fn load(&self) -> Result<ProgressTable, StoreError> {
        if !self.path.exists() {
            log::info!(
                "No progress snapshot at {}, starting fresh",
                self.path.display()
            );
            return Ok(ProgressTable::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.csv_error(e))?;

        let mut table = ProgressTable::new();
        for (index, result) in reader.deserialize::<SnapshotRow>().enumerate() {
            let row = result.map_err(|e| self.csv_error(e))?;
            let line = index as u64 + 2;
            let record = row.into_record().map_err(|message| StoreError::Malformed {
                path: self.path.display().to_string(),
                line,
                message,
            })?;
            table.upsert(record);
        }

        log::info!(
            "Loaded {} records from {}: {}",
            table.len(),
            self.path.display(),
            table.counts()
        );

        Ok(table)
    }

    fn save(&self, table: &ProgressTable) -> Result<(), StoreError> {
        write_atomic(&self.path, |file| {
            let mut writer = csv::Writer::from_writer(file);
            for record in table.iter() {
                writer.serialize(SnapshotRow::from_record(record))?;
            }
            if table.is_empty() {
                writer.write_record(["code", "found", "product_name", "source"])?;
            }
            writer.flush()
        })
        .map_err(|(path, source)| StoreError::Io { path, source })?;

        log::debug!("Saved {} records to {}", table.len(), self.path.display());
        Ok(())
    }
}

/// Progress kept in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    table: Mutex<ProgressTable>,
    saves: Mutex<usize>,
}

impl MemoryProgressStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that starts out holding `table`.
    #[must_use]
    pub fn with_table(table: ProgressTable) -> Self {
        Self {
            table: Mutex::new(table),
            saves: Mutex::new(0),
        }
    }

    /// Returns a copy of the last saved table.
    #[must_use]
    pub fn snapshot(&self) -> ProgressTable {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful saves so far.
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProgressStore for MemoryProgressStore {
    fn load(&self) -> Result<ProgressTable, StoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, table: &ProgressTable) -> Result<(), StoreError> {
        *self.table.lock().unwrap_or_else(PoisonError::into_inner) = table.clone();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

/// Writes `path` by way of a sibling `*.tmp` file.
///
/// `write` fills the temp file; it is then synced to disk and renamed over
/// `path`. Missing parent directories are created. On failure the temp file
/// is removed, the error is returned along with the path it concerns and
/// the target is untouched.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<(), (String, std::io::Error)>
where
    F: FnOnce(&mut File) -> std::io::Result<()>,
{
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_at(parent))?;
    }

    let tmp_path = tmp_path(path).map_err(io_at(path))?;

    let written = File::create(&tmp_path).and_then(|mut file| {
        write(&mut file)?;
        file.flush()?;
        file.sync_all()
    });
    if let Err(e) = written {
        remove_tmp(&tmp_path);
        return Err(io_at(&tmp_path)(e));
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        remove_tmp(&tmp_path);
        return Err(io_at(path)(e));
    }

    Ok(())
}

fn remove_tmp(tmp_path: &Path) {
    if let Err(e) = std::fs::remove_file(tmp_path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        log::warn!("Failed to remove {}: {e}", tmp_path.display());
    }
}

fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> (String, std::io::Error) {
    let path = path.display().to_string();
    move |e| (path, e)
}

fn tmp_path(path: &Path) -> std::io::Result<PathBuf> {
    let mut name = path
        .file_name()
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
        })?
        .to_os_string();
    name.push(".tmp");
    Ok(path.with_file_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> ProgressTable {
        [
            VerificationRecord::verified("012345678905", "Acme Widget, Large", "openfoodfacts"),
            VerificationRecord::not_found("036000291452"),
            VerificationRecord::rate_limited("705105677736", "upcitemdb"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvProgressStore::new(dir.path().join("progress.csv"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_restores_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvProgressStore::new(dir.path().join("nested").join("progress.csv"));

        store.save(&sample_table()).unwrap();
        let loaded = store.load().unwrap();

        assert_eq!(loaded, sample_table());
        assert_eq!(
            loaded.get("705105677736").unwrap().status,
            VerificationStatus::NotChecked
        );
        assert!(!dir.path().join("nested").join("progress.csv.tmp").exists());
    }

    #[test]
    fn save_of_load_leaves_content_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.csv");
        let store = CsvProgressStore::new(&path);

        store.save(&sample_table()).unwrap();
        let before = std::fs::read(&path).unwrap();

        store.save(&store.load().unwrap()).unwrap();
        let after = std::fs::read(&path).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn writes_snake_case_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.csv");
        let store = CsvProgressStore::new(&path);

        store.save(&sample_table()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();

        assert!(content.starts_with("code,found,product_name,source\n"));
        assert!(content.contains("012345678905,true,\"Acme Widget, Large\",openfoodfacts"));
        assert!(content.contains("036000291452,false,,"));
    }

    #[test]
    fn reads_title_case_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.csv");
        std::fs::write(
            &path,
            "UPC,Found,Product Name,Source\n\
             012345678905,True,Acme Widget,UPCitemdb\n\
             036000291452,False,,\n",
        )
        .unwrap();

        let table = CsvProgressStore::new(&path).load().unwrap();
        assert!(table.is_verified("012345678905"));
        assert_eq!(
            table.get("036000291452").unwrap().status,
            VerificationStatus::NotFound
        );
    }

    #[test]
    fn legacy_rate_limit_rows_load_as_not_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.csv");
        std::fs::write(
            &path,
            "UPC,Found,Product Name,Source\n\
             705105677736,False,Rate limit reached,UPCitemdb\n\
             036000291452,False,Rate limited,Rate limited\n\
             012345678905,False,,\n",
        )
        .unwrap();

        let table = CsvProgressStore::new(&path).load().unwrap();

        let tagged = table.get("705105677736").unwrap();
        assert!(tagged.is_rate_limited());
        assert_eq!(tagged.source, "rate limited: UPCitemdb");
        assert!(tagged.product_name.is_empty());

        let untagged = table.get("036000291452").unwrap();
        assert!(untagged.is_rate_limited());
        assert_eq!(untagged.source, "rate limited: unknown");

        assert_eq!(
            table.get("012345678905").unwrap().status,
            VerificationStatus::NotFound
        );

        let codes = ["705105677736", "036000291452", "012345678905"]
            .map(crate::testing::code)
            .to_vec();
        let selected = crate::selection::select_codes(
            &codes,
            &table,
            crate::selection::RunMode::Full,
            false,
            &mut rand::thread_rng(),
        );
        assert_eq!(selected, codes[..2].to_vec());
    }

    #[test]
    fn rejects_bad_found_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.csv");
        std::fs::write(&path, "code,found,product_name,source\n012345678905,maybe,,\n").unwrap();

        let err = CsvProgressStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Malformed { line: 2, .. }));
    }

    #[test]
    fn failed_write_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.csv");
        std::fs::write(&path, "previous").unwrap();

        let result = write_atomic(&path, |_| Err(std::io::Error::other("disk full")));

        assert!(result.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "previous");
        assert!(!dir.path().join("progress.csv.tmp").exists());
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemoryProgressStore::new();
        store.save(&sample_table()).unwrap();
        store.save(&sample_table()).unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load().unwrap(), sample_table());
    }
}
