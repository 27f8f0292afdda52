#![allow(clippy::module_name_repetitions)]

//! Interactive menu for the verification tool.
//!
//! Offers the run sizes and the report commands through `dialoguer`
//! prompts, for when the tool is started without a subcommand.

use dialoguer::{Confirm, Input, Select};
use upc_verify_cli_utils::{IndicatifProgress, MultiProgress};

use crate::run::CancelSignal;
use crate::selection::{DEFAULT_BATCH_SIZE, RunMode};
use crate::{VerifyOptions, export_only, print_sources, progress_summary, verify};

/// Top-level actions in the menu.
enum VerifyAction {
    QuickTest,
    RandomSample,
    Batch,
    FullRun,
    ExportOnly,
    ShowSummary,
    ListSources,
}

impl VerifyAction {
    const ALL: &[Self] = &[
        Self::QuickTest,
        Self::RandomSample,
        Self::Batch,
        Self::FullRun,
        Self::ExportOnly,
        Self::ShowSummary,
        Self::ListSources,
    ];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::QuickTest => "Quick test (10 codes)",
            Self::RandomSample => "Random sample",
            Self::Batch => "Batch (first N pending codes)",
            Self::FullRun => "Full run (all pending codes)",
            Self::ExportOnly => "Export results from saved progress",
            Self::ShowSummary => "Show progress summary",
            Self::ListSources => "List lookup sources",
        }
    }
}

/// Runs the menu once with `options` as the starting point.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected operation fails.
pub async fn run(
    mut options: VerifyOptions,
    cancel: &CancelSignal,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let labels: Vec<&str> = VerifyAction::ALL.iter().map(VerifyAction::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    let mode = match VerifyAction::ALL[idx] {
        VerifyAction::QuickTest => RunMode::Quick,
        VerifyAction::RandomSample => RunMode::Sample(prompt_count("Sample size", 100)?),
        VerifyAction::Batch => RunMode::Batch(prompt_count("Batch size", DEFAULT_BATCH_SIZE)?),
        VerifyAction::FullRun => RunMode::Full,
        VerifyAction::ExportOnly => {
            let counts = export_only(&options.paths, options.layout)?;
            println!("Exported {counts} to {}", options.paths.output.display());
            return Ok(());
        }
        VerifyAction::ShowSummary => {
            let counts = progress_summary(&options.paths.progress)?;
            println!("{} records: {counts}", counts.total());
            return Ok(());
        }
        VerifyAction::ListSources => {
            print_sources();
            return Ok(());
        }
    };

    options.mode = mode;
    options.recheck_not_found = Confirm::new()
        .with_prompt("Look up codes previously not found again?")
        .default(false)
        .interact()?;

    let progress = IndicatifProgress::codes_bar(multi, "Loading progress...");
    let (report, counts) = verify(&options, cancel, Some(progress)).await?;

    println!("{}", report.summary);
    println!("Exported {counts} to {}", options.paths.output.display());

    Ok(())
}

/// Prompts for a positive count.
fn prompt_count(prompt: &str, default: usize) -> Result<usize, dialoguer::Error> {
    Input::<usize>::new()
        .with_prompt(prompt)
        .default(default)
        .validate_with(|n: &usize| if *n > 0 { Ok(()) } else { Err("must be at least 1") })
        .interact_text()
}
