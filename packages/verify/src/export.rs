//! Merging verification results back onto the input rows.
//!
//! The export keeps every input row and every input column, prefixed with
//! `Verified in DB`, `Database Product Name` and `Source`.

use std::fmt;
use std::io::Write;
use std::path::Path;

use strum_macros::{AsRefStr, Display, EnumString};
use upc_verify_models::{ProgressTable, VerificationStatus};

use crate::input::{InputRow, InputTable, RowCode};
use crate::store::write_atomic;

/// Columns prepended to the input header.
pub const EXPORT_COLUMNS: [&str; 3] = ["Verified in DB", "Database Product Name", "Source"];

/// Product name column value for rows whose code failed validation.
pub const INVALID_FORMAT: &str = "Invalid format";

/// Errors from writing the export.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// I/O error on the export file or its temp file.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Value of the `Verified in DB` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
pub enum ExportStatus {
    /// Found in a source.
    #[strum(serialize = "YES")]
    Yes,
    /// No source knows the code, or the code is malformed.
    #[strum(serialize = "NO")]
    No,
    /// Never answered.
    #[strum(serialize = "NOT CHECKED")]
    NotChecked,
}

/// Rows written per export status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportCounts {
    /// Rows marked `YES`.
    pub verified: usize,
    /// Rows marked `NO` because no source knew the code.
    pub not_found: usize,
    /// Rows marked `NO` because the code is malformed.
    pub invalid: usize,
    /// Rows marked `NOT CHECKED`.
    pub not_checked: usize,
}

impl ExportCounts {
    /// Total rows written.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.verified + self.not_found + self.invalid + self.not_checked
    }
}

impl fmt::Display for ExportCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows: {} verified, {} not found, {} invalid, {} not checked",
            self.total(),
            self.verified,
            self.not_found,
            self.invalid,
            self.not_checked
        )
    }
}

/// The three prefix columns for `row`.
fn export_columns(row: &InputRow, table: &ProgressTable) -> (ExportStatus, String, String) {
    let RowCode::Valid(code) = &row.code else {
        return (ExportStatus::No, INVALID_FORMAT.to_string(), String::new());
    };

    match table.get(code.as_str()) {
        Some(record) if record.status == VerificationStatus::Verified => (
            ExportStatus::Yes,
            record.product_name.clone(),
            record.source.clone(),
        ),
        Some(record) if record.status == VerificationStatus::NotFound => {
            (ExportStatus::No, String::new(), String::new())
        }
        Some(record) => (ExportStatus::NotChecked, String::new(), record.source.clone()),
        None => (ExportStatus::NotChecked, String::new(), String::new()),
    }
}

/// Writes the merged rows as CSV to `writer`.
///
/// # Errors
///
/// Returns [`csv::Error`] if a row cannot be written.
pub fn write_export<W: Write>(
    input: &InputTable,
    table: &ProgressTable,
    writer: W,
) -> Result<ExportCounts, csv::Error> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(writer);

    writer.write_record(
        EXPORT_COLUMNS
            .iter()
            .copied()
            .chain(input.headers.iter().map(String::as_str)),
    )?;

    let mut counts = ExportCounts::default();
    for row in &input.rows {
        let (status, product_name, source) = export_columns(row, table);
        match (status, &row.code) {
            (ExportStatus::Yes, _) => counts.verified += 1,
            (ExportStatus::No, RowCode::Invalid) => counts.invalid += 1,
            (ExportStatus::No, RowCode::Valid(_)) => counts.not_found += 1,
            (ExportStatus::NotChecked, _) => counts.not_checked += 1,
        }

        writer.write_record(
            [status.as_ref(), product_name.as_str(), source.as_str()]
                .into_iter()
                .chain(row.fields.iter().map(String::as_str)),
        )?;
    }

    writer.flush()?;
    Ok(counts)
}

/// Writes the export to `path`, replacing it atomically.
///
/// # Errors
///
/// Returns [`ExportError`] if the file cannot be written.
pub fn export(
    input: &InputTable,
    table: &ProgressTable,
    path: &Path,
) -> Result<ExportCounts, ExportError> {
    let mut counts = ExportCounts::default();
    write_atomic(path, |file| {
        counts = write_export(input, table, file)?;
        Ok(())
    })
    .map_err(|(path, source)| ExportError::Io { path, source })?;

    log::info!("Exported {counts} to {}", path.display());
    Ok(counts)
}
