//! Reading the master list of product codes.
//!
//! The input is a CSV with a header row. One column carries the code; an
//! optional column carries a `YES`/`NO` flag from an earlier format check.
//! Every other column is passed through untouched to the export.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use upc_verify_models::{ValidCode, validate};

/// Errors from reading the input file.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    /// CSV error in the input file.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// Path to the input file.
        path: String,
        /// Underlying CSV error.
        source: csv::Error,
    },
}

/// Where the interesting columns are, as zero-based indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLayout {
    /// Column holding the format-check flag, if the file has one.
    pub flag_column: Option<usize>,
    /// Column holding the product code.
    pub code_column: usize,
}

impl Default for InputLayout {
    fn default() -> Self {
        Self {
            flag_column: Some(0),
            code_column: 1,
        }
    }
}

/// Classification of a row's code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowCode {
    /// Well-formed and flagged valid.
    Valid(ValidCode),
    /// Malformed, or flagged invalid by the earlier check.
    Invalid,
}

/// A data row of the input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRow {
    /// One-based line number in the file.
    pub line: u64,
    /// Raw fields, as read.
    pub fields: Vec<String>,
    /// Classification of the row's code.
    pub code: RowCode,
}

impl InputRow {
    /// The row's code, when valid.
    #[must_use]
    pub const fn valid_code(&self) -> Option<&ValidCode> {
        match &self.code {
            RowCode::Valid(code) => Some(code),
            RowCode::Invalid => None,
        }
    }
}

/// The parsed input file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputTable {
    /// Header row.
    pub headers: Vec<String>,
    /// Data rows in file order.
    pub rows: Vec<InputRow>,
}

impl InputTable {
    /// Distinct valid codes in first-seen order.
    #[must_use]
    pub fn valid_codes(&self) -> Vec<ValidCode> {
        let mut seen = BTreeSet::new();
        self.rows
            .iter()
            .filter_map(InputRow::valid_code)
            .filter(|code| seen.insert(code.as_str()))
            .cloned()
            .collect()
    }

    /// Number of rows whose code is invalid.
    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.code == RowCode::Invalid)
            .count()
    }
}

/// Whether a flag cell marks the code as valid.
fn flag_is_set(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_uppercase().as_str(),
        "YES" | "Y" | "TRUE" | "1"
    )
}

fn classify(fields: &[String], layout: InputLayout) -> RowCode {
    if let Some(flag_column) = layout.flag_column
        && !fields.get(flag_column).is_some_and(|flag| flag_is_set(flag))
    {
        return RowCode::Invalid;
    }

    fields
        .get(layout.code_column)
        .and_then(|raw| validate(raw).ok())
        .map_or(RowCode::Invalid, RowCode::Valid)
}

/// Parses input rows from `reader`.
///
/// Rows that are entirely empty, or too short to hold a code, are skipped.
///
/// # Errors
///
/// Returns [`csv::Error`] if the CSV is unreadable.
pub fn parse_input<R: Read>(reader: R, layout: InputLayout) -> Result<InputTable, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.iter().map(str::to_string).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, csv::Position::line);
        let fields: Vec<String> = record.iter().map(str::to_string).collect();

        if fields.len() <= layout.code_column || fields.iter().all(|f| f.trim().is_empty()) {
            log::debug!("Skipping blank input line {line}");
            continue;
        }

        let code = classify(&fields, layout);
        rows.push(InputRow { line, fields, code });
    }

    Ok(InputTable { headers, rows })
}

/// Reads the input file at `path`.
///
/// # Errors
///
/// Returns [`InputError`] if the file cannot be opened or parsed.
pub fn read_input(path: &Path, layout: InputLayout) -> Result<InputTable, InputError> {
    let csv_error = |source| InputError::Csv {
        path: path.display().to_string(),
        source,
    };

    let file = std::fs::File::open(path)
        .map_err(csv::Error::from)
        .map_err(csv_error)?;
    let table = parse_input(file, layout).map_err(csv_error)?;

    log::info!(
        "Read {} rows from {}: {} distinct valid codes, {} invalid",
        table.rows.len(),
        path.display(),
        table.valid_codes().len(),
        table.invalid_count()
    );

    Ok(table)
}
