//! The verification run controller.
//!
//! Walks an ordered list of codes, resolves each one through the
//! [`LookupOrchestrator`], folds the outcome into the [`ProgressTable`] and
//! checkpoints the table to a [`ProgressStore`]. Runs are sequential: one
//! code at a time, one outbound request at a time.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use upc_verify_models::{LookupOutcome, ProgressTable, ValidCode, VerificationRecord};
use upc_verify_source::progress::{ProgressCallback, null_progress};

use crate::pacing::{Pacer, PacingConfig};
use crate::resolver::LookupOrchestrator;
use crate::store::{ProgressStore, StoreError};

/// Hard failures that end a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// There are no sources to ask.
    #[error("No lookup sources are available")]
    NoSources,

    /// The progress store could not be read or written.
    #[error("Progress store failure: {0}")]
    Persistence(#[from] StoreError),
}

/// Run tuning. Every field is a plain value so callers can build it from
/// CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    /// Delay between two source calls for the same code.
    pub call_delay: Duration,
    /// Delay and backoff between codes.
    pub pacing: PacingConfig,
    /// Save the table after this many processed codes. `0` saves only at
    /// the end of the run.
    pub checkpoint_every: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            call_delay: Duration::from_secs(1),
            pacing: PacingConfig::default(),
            checkpoint_every: 10,
        }
    }
}

/// Cooperative cancellation for a run.
///
/// Wraps the receiving half of a `watch` channel; the run stops once the
/// value turns `true`.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Creates a signal and the sender that trips it.
    #[must_use]
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// A signal that never trips.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once cancellation is requested. Never completes if the
    /// sender is gone without having tripped the signal.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every code was visited.
    Completed,
    /// The cancel signal tripped.
    Cancelled,
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Codes looked up.
    pub processed: usize,
    /// Codes skipped because they were already verified.
    pub skipped: usize,
    /// Codes found.
    pub verified: usize,
    /// Codes no source knew.
    pub not_found: usize,
    /// Codes cut short by a rate limit.
    pub rate_limited: usize,
    /// Source failures absorbed along the way.
    pub transient_errors: usize,
    /// Successful saves.
    pub checkpoints: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed ({} verified, {} not found, {} rate limited), {} skipped, {} transient errors",
            self.processed,
            self.verified,
            self.not_found,
            self.rate_limited,
            self.skipped,
            self.transient_errors
        )
    }
}

/// What a finished run hands back.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// The table as last saved.
    pub table: ProgressTable,
    /// Counters for this run.
    pub summary: RunSummary,
    /// Why the run stopped.
    pub stop: StopReason,
}

/// Turns a chain outcome into the record to store, if any.
fn record_for(code: &ValidCode, outcome: &LookupOutcome) -> Option<VerificationRecord> {
    match outcome {
        LookupOutcome::Found {
            product_name,
            source_id,
        } => Some(VerificationRecord::verified(
            code.as_str(),
            product_name.as_str(),
            source_id.as_str(),
        )),
        LookupOutcome::NotFound => Some(VerificationRecord::not_found(code.as_str())),
        LookupOutcome::RateLimited { source_id, .. } => {
            Some(VerificationRecord::rate_limited(code.as_str(), source_id))
        }
        LookupOutcome::TransientError { .. } => None,
    }
}

/// Saves `table`, making one more best-effort attempt on failure.
///
/// The first error is returned either way; a failed save ends the run, so
/// the summary so far is logged before giving up.
fn save(
    store: &dyn ProgressStore,
    table: &ProgressTable,
    summary: &RunSummary,
) -> Result<(), StoreError> {
    store.save(table).map_err(|e| {
        log::error!("Failed to save progress: {e}");
        if let Err(retry) = store.save(table) {
            log::error!("Retry failed too: {retry}");
        }
        log::error!("Run aborted: {summary}; overall {}", table.counts());
        e
    })
}

/// Runs verification over `codes`, in order.
///
/// The table is seeded from `store`. Codes already verified there are
/// skipped without any lookup. The table is saved every
/// [`RunConfig::checkpoint_every`] processed codes and once more when the
/// run stops, whether it completed or was cancelled.
///
/// # Errors
///
/// * [`RunError::NoSources`] if the orchestrator has no sources.
/// * [`RunError::Persistence`] if the store cannot be loaded or a save
///   fails. Results since the last good save are lost in that case.
#[allow(clippy::too_many_lines)]
pub async fn run(
    orchestrator: &LookupOrchestrator,
    store: &dyn ProgressStore,
    codes: &[ValidCode],
    config: &RunConfig,
    cancel: &CancelSignal,
    progress: Option<Arc<dyn ProgressCallback>>,
) -> Result<RunReport, RunError> {
    if orchestrator.is_empty() {
        return Err(RunError::NoSources);
    }

    let progress = progress.unwrap_or_else(null_progress);
    let mut table = store.load()?;
    let mut pacer = Pacer::new(config.pacing);
    let mut summary = RunSummary::default();
    let mut stop = StopReason::Completed;
    let mut since_checkpoint = 0;

    log::info!(
        "Verifying {} codes against {}",
        codes.len(),
        orchestrator.source_ids().join(" -> ")
    );
    progress.set_total(codes.len() as u64);

    for (i, code) in codes.iter().enumerate() {
        if cancel.is_cancelled() {
            stop = StopReason::Cancelled;
            break;
        }

        if table.is_verified(code.as_str()) {
            log::debug!("{code}: already verified, skipping");
            summary.skipped += 1;
            progress.inc(1);
            continue;
        }

        progress.set_message(code.to_string());

        let resolution = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            resolution = orchestrator.resolve(code) => Some(resolution),
        };
        let Some(resolution) = resolution else {
            stop = StopReason::Cancelled;
            break;
        };

        summary.processed += 1;
        summary.transient_errors += resolution.transient_errors.len();
        match &resolution.outcome {
            LookupOutcome::Found { product_name, .. } => {
                summary.verified += 1;
                log::info!("{code}: {product_name}");
            }
            LookupOutcome::NotFound => summary.not_found += 1,
            LookupOutcome::RateLimited { .. } => summary.rate_limited += 1,
            LookupOutcome::TransientError { .. } => {}
        }
        if let Some(record) = record_for(code, &resolution.outcome) {
            table.upsert(record);
        }
        progress.inc(1);

        since_checkpoint += 1;
        if config.checkpoint_every > 0 && since_checkpoint >= config.checkpoint_every {
            save(store, &table, &summary)?;
            summary.checkpoints += 1;
            since_checkpoint = 0;
            log::info!("Checkpoint: {summary}; overall {}", table.counts());
        }

        if i + 1 == codes.len() {
            break;
        }

        let delay = pacer.after_outcome(&resolution.outcome);
        if resolution.outcome.is_rate_limited() {
            log::warn!(
                "{} consecutive rate limits, waiting {}s",
                pacer.consecutive(),
                delay.as_secs()
            );
        }

        let slept = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        };
        if !slept {
            stop = StopReason::Cancelled;
            break;
        }
    }

    if stop == StopReason::Cancelled {
        log::warn!("Run cancelled, saving progress");
    }

    save(store, &table, &summary)?;
    summary.checkpoints += 1;

    log::info!("Run finished: {summary}; overall {}", table.counts());
    progress.finish(format!("{summary}"));

    Ok(RunReport {
        table,
        summary,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use upc_verify_models::VerificationStatus;
    use upc_verify_source::SourceAdapter;

    use super::*;
    use crate::store::{CsvProgressStore, MemoryProgressStore};
    use crate::testing::{CallLog, ScriptedSource, codes};

    fn chain(sources: Vec<ScriptedSource>) -> LookupOrchestrator {
        LookupOrchestrator::new(
            sources
                .into_iter()
                .map(|s| Box::new(s) as Box<dyn SourceAdapter>)
                .collect(),
            Duration::ZERO,
        )
    }

    fn config(checkpoint_every: usize) -> RunConfig {
        RunConfig {
            call_delay: Duration::ZERO,
            pacing: PacingConfig {
                code_delay: Duration::from_secs(1),
                base_backoff: Duration::from_secs(2),
                backoff_threshold: 3,
                backoff_multiplier: 2,
            },
            checkpoint_every,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn verified_codes_are_never_looked_up_again() {
        let all = codes(3);
        let store = MemoryProgressStore::with_table(
            [VerificationRecord::verified(all[1].as_str(), "Widget", "A")]
                .into_iter()
                .collect(),
        );
        let log = CallLog::default();
        let orchestrator = chain(vec![ScriptedSource::new("A", &log, |_| {
            LookupOutcome::NotFound
        })]);

        let report = run(
            &orchestrator,
            &store,
            &all,
            &config(10),
            &CancelSignal::never(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(log.codes(), vec![all[0].to_string(), all[2].to_string()]);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.processed, 2);
        assert_eq!(report.stop, StopReason::Completed);
        assert!(store.snapshot().is_verified(all[1].as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn records_each_outcome() {
        let all = codes(3);
        let store = MemoryProgressStore::new();
        let log = CallLog::default();
        let first = all[0].clone();
        let second = all[1].clone();
        let orchestrator = chain(vec![ScriptedSource::new("A", &log, move |code| {
            if *code == first {
                LookupOutcome::found("Widget", "A")
            } else if *code == second {
                LookupOutcome::RateLimited {
                    source_id: "A".to_string(),
                    retry_hint: None,
                }
            } else {
                LookupOutcome::NotFound
            }
        })]);

        let report = run(
            &orchestrator,
            &store,
            &all,
            &config(10),
            &CancelSignal::never(),
            None,
        )
        .await
        .unwrap();

        let table = store.snapshot();
        assert_eq!(table, report.table);
        assert!(table.is_verified(all[0].as_str()));
        assert!(table.get(all[1].as_str()).unwrap().is_rate_limited());
        assert_eq!(
            table.get(all[2].as_str()).unwrap().status,
            VerificationStatus::NotFound
        );
        assert_eq!(report.summary.verified, 1);
        assert_eq!(report.summary.rate_limited, 1);
        assert_eq!(report.summary.not_found, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_escalates_and_resets() {
        let all = codes(7);
        let rate_limited: Vec<ValidCode> = all[..5].to_vec();
        let log = CallLog::default();
        let orchestrator = chain(vec![ScriptedSource::new("A", &log, move |code| {
            if rate_limited.contains(code) {
                LookupOutcome::RateLimited {
                    source_id: "A".to_string(),
                    retry_hint: None,
                }
            } else {
                LookupOutcome::NotFound
            }
        })]);

        run(
            &orchestrator,
            &MemoryProgressStore::new(),
            &all,
            &config(10),
            &CancelSignal::never(),
            None,
        )
        .await
        .unwrap();

        let gaps = log.gaps();
        assert_eq!(gaps.len(), 6);
        for window in gaps[..5].windows(2) {
            assert!(window[0] < window[1], "{gaps:?}");
        }
        assert_eq!(gaps[5], Duration::from_secs(1));
        assert!(gaps[4] > gaps[5]);
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoints_every_batch() {
        let all = codes(25);
        let store = MemoryProgressStore::new();
        let log = CallLog::default();
        let orchestrator = chain(vec![ScriptedSource::new("A", &log, |_| {
            LookupOutcome::NotFound
        })]);

        let report = run(
            &orchestrator,
            &store,
            &all,
            &config(10),
            &CancelSignal::never(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(store.save_count(), 3);
        assert_eq!(report.summary.checkpoints, 3);
        assert_eq!(store.snapshot().len(), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn crash_keeps_last_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.csv");
        let all = codes(20);

        let task_path = path.clone();
        let task_codes = all.clone();
        let handle = tokio::spawn(async move {
            let calls = AtomicUsize::new(0);
            let log = CallLog::default();
            let orchestrator = chain(vec![ScriptedSource::new("A", &log, move |_| {
                assert!(
                    calls.fetch_add(1, Ordering::SeqCst) < 15,
                    "simulated crash"
                );
                LookupOutcome::found("Widget", "A")
            })]);
            let store = CsvProgressStore::new(task_path);
            run(
                &orchestrator,
                &store,
                &task_codes,
                &config(10),
                &CancelSignal::never(),
                None,
            )
            .await
        });

        assert!(handle.await.unwrap_err().is_panic());

        let table = CsvProgressStore::new(&path).load().unwrap();
        assert_eq!(table.len(), 10);
        for code in &all[..10] {
            assert!(table.is_verified(code.as_str()));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_flushes_progress() {
        let all = codes(5);
        let store = MemoryProgressStore::new();
        let (tx, cancel) = CancelSignal::channel();
        let log = CallLog::default();
        let orchestrator = chain(vec![ScriptedSource::new("A", &log, move |_| {
            tx.send_replace(true);
            LookupOutcome::found("Widget", "A")
        })]);

        let report = run(&orchestrator, &store, &all, &config(10), &cancel, None)
            .await
            .unwrap();

        assert_eq!(report.stop, StopReason::Cancelled);
        assert_eq!(log.codes().len(), 1);
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.snapshot().len(), 1);
    }

    struct StalledSource;

    #[async_trait::async_trait]
    impl SourceAdapter for StalledSource {
        fn id(&self) -> &str {
            "stalled"
        }

        fn name(&self) -> &str {
            "Stalled"
        }

        async fn lookup(&self, _code: &ValidCode) -> LookupOutcome {
            tokio::time::sleep(Duration::from_secs(60)).await;
            LookupOutcome::found("Widget", "stalled")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_pending_lookup() {
        let all = codes(3);
        let store = MemoryProgressStore::new();
        let (tx, cancel) = CancelSignal::channel();
        let orchestrator = LookupOrchestrator::new(
            vec![Box::new(StalledSource) as Box<dyn SourceAdapter>],
            Duration::ZERO,
        );

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            tx.send_replace(true);
        });

        let started = tokio::time::Instant::now();
        let report = run(&orchestrator, &store, &all, &config(10), &cancel, None)
            .await
            .unwrap();

        assert_eq!(report.stop, StopReason::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(report.summary.processed, 0);
        assert!(store.snapshot().get(all[0].as_str()).is_none());
        assert_eq!(store.save_count(), 1);
    }

    struct BrokenStore {
        attempts: AtomicUsize,
    }

    impl ProgressStore for BrokenStore {
        fn load(&self) -> Result<ProgressTable, StoreError> {
            Ok(ProgressTable::new())
        }

        fn save(&self, _table: &ProgressTable) -> Result<(), StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Io {
                path: "progress.csv".to_string(),
                source: std::io::Error::other("disk full"),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn save_failure_aborts_the_run() {
        let all = codes(15);
        let store = BrokenStore {
            attempts: AtomicUsize::new(0),
        };
        let log = CallLog::default();
        let orchestrator = chain(vec![ScriptedSource::new("A", &log, |_| {
            LookupOutcome::NotFound
        })]);

        let err = run(
            &orchestrator,
            &store,
            &all,
            &config(10),
            &CancelSignal::never(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RunError::Persistence(_)));
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(log.codes().len(), 10);
    }

    #[tokio::test]
    async fn empty_chain_is_an_error() {
        let err = run(
            &chain(Vec::new()),
            &MemoryProgressStore::new(),
            &codes(1),
            &RunConfig::default(),
            &CancelSignal::never(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RunError::NoSources));
    }
}
