//! Choosing which codes a run walks through.

use std::fmt;

use rand::Rng;
use upc_verify_models::{ProgressTable, ValidCode, VerificationStatus};

/// Number of codes in a quick test run.
pub const QUICK_RUN_SIZE: usize = 10;

/// Default number of codes in a batch run.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// How many of the pending codes a run takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// The first [`QUICK_RUN_SIZE`] pending codes.
    Quick,
    /// `n` pending codes drawn at random, kept in input order.
    Sample(usize),
    /// The first `n` pending codes.
    Batch(usize),
    /// Every pending code.
    Full,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quick => write!(f, "quick test ({QUICK_RUN_SIZE} codes)"),
            Self::Sample(n) => write!(f, "random sample of {n}"),
            Self::Batch(n) => write!(f, "batch of {n}"),
            Self::Full => f.write_str("full run"),
        }
    }
}

/// Whether `code` still needs a lookup given the existing results.
fn is_pending(table: &ProgressTable, code: &ValidCode, recheck_not_found: bool) -> bool {
    match table.get(code.as_str()).map(|record| record.status) {
        None | Some(VerificationStatus::NotChecked) => true,
        Some(VerificationStatus::NotFound) => recheck_not_found,
        Some(VerificationStatus::Verified) => false,
    }
}

/// Picks the codes for a run.
///
/// Works on `codes` in order, dropping those already verified and, unless
/// `recheck_not_found` is set, those already found missing everywhere.
/// The result is always in input order.
pub fn select_codes<R: Rng + ?Sized>(
    codes: &[ValidCode],
    table: &ProgressTable,
    mode: RunMode,
    recheck_not_found: bool,
    rng: &mut R,
) -> Vec<ValidCode> {
    let pending: Vec<&ValidCode> = codes
        .iter()
        .filter(|code| is_pending(table, code, recheck_not_found))
        .collect();

    let take = |n: usize| -> Vec<ValidCode> {
        pending.iter().take(n).map(|&code| code.clone()).collect()
    };

    let selected: Vec<ValidCode> = match mode {
        RunMode::Quick => take(QUICK_RUN_SIZE),
        RunMode::Batch(n) => take(n),
        RunMode::Full => take(pending.len()),
        RunMode::Sample(n) if n >= pending.len() => take(pending.len()),
        RunMode::Sample(n) => {
            let mut indices = rand::seq::index::sample(rng, pending.len(), n).into_vec();
            indices.sort_unstable();
            indices.into_iter().map(|i| pending[i].clone()).collect()
        }
    };

    log::info!(
        "Selected {} of {} pending codes ({mode})",
        selected.len(),
        pending.len()
    );

    selected
}
