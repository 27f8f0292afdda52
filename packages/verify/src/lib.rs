#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Product code verification.
//!
//! Reads a master list of UPC codes, asks the configured lookup sources
//! about each one in priority order, and records whether the code is known
//! and under which product name. Progress is checkpointed to a CSV
//! snapshot so an interrupted run resumes where it left off, and the
//! results are merged back onto the input rows at the end.

pub mod export;
pub mod input;
pub mod interactive;
pub mod pacing;
pub mod resolver;
pub mod run;
pub mod selection;
pub mod store;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use upc_verify_models::StatusCounts;
use upc_verify_source::progress::ProgressCallback;
use upc_verify_source::registry;

use crate::export::{ExportCounts, ExportError};
use crate::input::{InputError, InputLayout};
use crate::resolver::LookupOrchestrator;
use crate::run::{CancelSignal, RunConfig, RunError, RunReport};
use crate::selection::RunMode;
use crate::store::{CsvProgressStore, ProgressStore, StoreError};

pub use upc_verify_models::{InvalidCode, ValidCode, validate};

/// Default input file.
pub const DEFAULT_INPUT_PATH: &str = "data/input.csv";
/// Default progress snapshot.
pub const DEFAULT_PROGRESS_PATH: &str = "data/verification_progress.csv";
/// Default export file.
pub const DEFAULT_OUTPUT_PATH: &str = "data/verified.csv";

/// Errors from the top-level operations.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// The input file could not be read.
    #[error(transparent)]
    Input(#[from] InputError),
    /// The progress snapshot could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The run failed.
    #[error(transparent)]
    Run(#[from] RunError),
    /// The export could not be written.
    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Files a verification works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    /// Master list of codes.
    pub input: PathBuf,
    /// Progress snapshot.
    pub progress: PathBuf,
    /// Export written after the run.
    pub output: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_INPUT_PATH),
            progress: PathBuf::from(DEFAULT_PROGRESS_PATH),
            output: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }
}

/// Everything a verification run needs to know.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Files to read and write.
    pub paths: Paths,
    /// Input column layout.
    pub layout: InputLayout,
    /// How many pending codes to take.
    pub mode: RunMode,
    /// Look up codes already found missing everywhere again.
    pub recheck_not_found: bool,
    /// Comma-separated source ids, overriding the registry's defaults.
    pub sources: Option<String>,
    /// Pacing and checkpointing.
    pub run: RunConfig,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            layout: InputLayout::default(),
            mode: RunMode::Full,
            recheck_not_found: false,
            sources: None,
            run: RunConfig::default(),
        }
    }
}

/// Builds the lookup chain from the source registry.
///
/// `sources` is the `--sources` override; see
/// [`registry::selected_services`].
#[must_use]
pub fn build_orchestrator(sources: Option<String>, call_delay: Duration) -> LookupOrchestrator {
    let services = registry::selected_services(sources);
    LookupOrchestrator::new(registry::build_chain(&services), call_delay)
}

/// Reads the input, runs verification over the selected codes and writes
/// the export.
///
/// A cancelled run still saves its progress and writes the export.
///
/// # Errors
///
/// Returns [`VerifyError`] if the input cannot be read, the run fails, or
/// the export cannot be written.
pub async fn verify(
    options: &VerifyOptions,
    cancel: &CancelSignal,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<(RunReport, ExportCounts), VerifyError> {
    let input = input::read_input(&options.paths.input, options.layout)?;
    let store = CsvProgressStore::new(&options.paths.progress);

    let codes = selection::select_codes(
        &input.valid_codes(),
        &store.load()?,
        options.mode,
        options.recheck_not_found,
        &mut rand::thread_rng(),
    );

    let orchestrator = build_orchestrator(options.sources.clone(), options.run.call_delay);
    let report = run::run(
        &orchestrator,
        &store,
        &codes,
        &options.run,
        cancel,
        progress,
    )
    .await?;

    let counts = export::export(&input, &report.table, &options.paths.output)?;

    Ok((report, counts))
}

/// Writes the export from the existing snapshot without any lookups.
///
/// # Errors
///
/// Returns [`VerifyError`] if a file cannot be read or written.
pub fn export_only(paths: &Paths, layout: InputLayout) -> Result<ExportCounts, VerifyError> {
    let input = input::read_input(&paths.input, layout)?;
    let table = CsvProgressStore::new(&paths.progress).load()?;
    Ok(export::export(&input, &table, &paths.output)?)
}

/// Counts the records in the snapshot at `path` per status.
///
/// # Errors
///
/// Returns [`StoreError`] if the snapshot cannot be read.
pub fn progress_summary(path: &std::path::Path) -> Result<StatusCounts, StoreError> {
    Ok(CsvProgressStore::new(path).load()?.counts())
}

/// Prints the configured sources.
pub fn print_sources() {
    println!(
        "{:<16} {:<9} {:<8} {:<24} NAME",
        "ID", "PRIORITY", "ENABLED", "CREDENTIAL"
    );
    println!("{}", "-".repeat(76));
    for service in registry::all_services() {
        let credential = service.credential_env().map_or_else(
            || "-".to_string(),
            |var| {
                let set = std::env::var(var).is_ok_and(|v| !v.trim().is_empty());
                format!("{var}{}", if set { "" } else { " (unset)" })
            },
        );
        println!(
            "{:<16} {:<9} {:<8} {:<24} {}",
            service.id,
            service.priority,
            if service.enabled { "yes" } else { "no" },
            credential,
            service.name
        );
    }
}
