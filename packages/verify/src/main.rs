#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the UPC verification tool.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use upc_verify::input::InputLayout;
use upc_verify::pacing::PacingConfig;
use upc_verify::run::{CancelSignal, RunConfig, StopReason};
use upc_verify::selection::{DEFAULT_BATCH_SIZE, RunMode};
use upc_verify::{
    DEFAULT_INPUT_PATH, DEFAULT_OUTPUT_PATH, DEFAULT_PROGRESS_PATH, Paths, VerifyOptions,
};
use upc_verify_cli_utils::IndicatifProgress;

#[derive(Parser)]
#[command(name = "upc_verify", about = "Verify product codes against lookup databases")]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct PathArgs {
    /// Master list of codes (CSV with a header row)
    #[arg(long, global = true, default_value = DEFAULT_INPUT_PATH)]
    input: PathBuf,
    /// Progress snapshot, read on start and rewritten at checkpoints
    #[arg(long, global = true, default_value = DEFAULT_PROGRESS_PATH)]
    progress: PathBuf,
    /// Export file written after a run
    #[arg(long, global = true, default_value = DEFAULT_OUTPUT_PATH)]
    output: PathBuf,
    /// Zero-based column holding the format-check flag
    #[arg(long, global = true, default_value = "0")]
    flag_column: usize,
    /// Treat every row as flagged valid (the file has no flag column)
    #[arg(long, global = true)]
    no_flag_column: bool,
    /// Zero-based column holding the code
    #[arg(long, global = true, default_value = "1")]
    code_column: usize,
}

impl PathArgs {
    fn paths(&self) -> Paths {
        Paths {
            input: self.input.clone(),
            progress: self.progress.clone(),
            output: self.output.clone(),
        }
    }

    const fn layout(&self) -> InputLayout {
        InputLayout {
            flag_column: if self.no_flag_column {
                None
            } else {
                Some(self.flag_column)
            },
            code_column: self.code_column,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// First 10 pending codes
    Quick,
    /// `--count` pending codes drawn at random
    Sample,
    /// First `--count` pending codes
    Batch,
    /// Every pending code
    Full,
}

#[derive(Args)]
struct RunArgs {
    /// How many pending codes to verify
    #[arg(long, value_enum, default_value = "full")]
    mode: Mode,
    /// Code count for `sample` and `batch`
    #[arg(long)]
    count: Option<usize>,
    /// Look up codes previously not found in any source again
    #[arg(long)]
    recheck_not_found: bool,
    /// Comma-separated list of source IDs to ask, in order (overrides `UPC_VERIFY_SOURCES` env var)
    #[arg(long)]
    sources: Option<String>,
    /// Seconds between two source calls for the same code
    #[arg(long, default_value = "1")]
    call_delay: u64,
    /// Seconds between codes
    #[arg(long, default_value = "7")]
    code_delay: u64,
    /// Backoff unit in seconds after a rate limit
    #[arg(long, default_value = "15")]
    base_backoff: u64,
    /// Consecutive rate limits before the backoff multiplier applies
    #[arg(long, default_value = "3")]
    backoff_threshold: u32,
    /// Backoff multiplier past the threshold
    #[arg(long, default_value = "2")]
    backoff_multiplier: u32,
    /// Save progress after this many codes
    #[arg(long, default_value = "10")]
    checkpoint_every: usize,
}

impl RunArgs {
    fn mode(&self) -> RunMode {
        match self.mode {
            Mode::Quick => RunMode::Quick,
            Mode::Sample => RunMode::Sample(self.count.unwrap_or(100)),
            Mode::Batch => RunMode::Batch(self.count.unwrap_or(DEFAULT_BATCH_SIZE)),
            Mode::Full => RunMode::Full,
        }
    }

    const fn config(&self) -> RunConfig {
        RunConfig {
            call_delay: Duration::from_secs(self.call_delay),
            pacing: PacingConfig {
                code_delay: Duration::from_secs(self.code_delay),
                base_backoff: Duration::from_secs(self.base_backoff),
                backoff_threshold: self.backoff_threshold,
                backoff_multiplier: self.backoff_multiplier,
            },
            checkpoint_every: self.checkpoint_every,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Verify pending codes, then write the export
    Verify {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Write the export from saved progress without any lookups
    Export,
    /// List configured lookup sources
    Sources,
    /// Print counts from the progress snapshot
    Summary,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = upc_verify_cli_utils::init_logger();
    let cli = Cli::parse();

    let (cancel_tx, cancel) = CancelSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, stopping after saving progress...");
            cancel_tx.send_replace(true);
        }
    });

    let paths = cli.paths.paths();
    let layout = cli.paths.layout();

    let Some(command) = cli.command else {
        let options = VerifyOptions {
            paths,
            layout,
            ..VerifyOptions::default()
        };
        return upc_verify::interactive::run(options, &cancel, &multi).await;
    };

    match command {
        Commands::Verify { run } => {
            let options = VerifyOptions {
                paths,
                layout,
                mode: run.mode(),
                recheck_not_found: run.recheck_not_found,
                sources: run.sources.clone(),
                run: run.config(),
            };

            let progress = IndicatifProgress::codes_bar(&multi, "Loading progress...");
            let (report, counts) = upc_verify::verify(&options, &cancel, Some(progress)).await?;

            if report.stop == StopReason::Cancelled {
                log::warn!("Run was interrupted; rerun to resume");
            }
            log::info!("{}", report.summary);
            log::info!("Exported {counts} to {}", options.paths.output.display());
        }
        Commands::Export => {
            let counts = upc_verify::export_only(&paths, layout)?;
            log::info!("Exported {counts} to {}", paths.output.display());
        }
        Commands::Sources => upc_verify::print_sources(),
        Commands::Summary => {
            let counts = upc_verify::progress_summary(&paths.progress)?;
            println!("{} records: {counts}", counts.total());
        }
    }

    Ok(())
}
