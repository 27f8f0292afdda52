//! Priority-ordered fallback across lookup sources.

use std::time::Duration;

use upc_verify_models::{LookupOutcome, ValidCode};
use upc_verify_source::SourceAdapter;

/// Result of resolving one code through the source chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// `Found`, `NotFound` or `RateLimited`. Never `TransientError`.
    pub outcome: LookupOutcome,
    /// `(source_id, detail)` for every source that failed along the way.
    pub transient_errors: Vec<(String, String)>,
    /// Number of sources asked.
    pub attempts: usize,
}

/// Asks sources in priority order until one knows the code.
pub struct LookupOrchestrator {
    adapters: Vec<Box<dyn SourceAdapter>>,
    call_delay: Duration,
}

impl LookupOrchestrator {
    /// Creates an orchestrator over `adapters`, asked in the given order,
    /// waiting `call_delay` between two calls for the same code.
    #[must_use]
    pub fn new(adapters: Vec<Box<dyn SourceAdapter>>, call_delay: Duration) -> Self {
        Self {
            adapters,
            call_delay,
        }
    }

    /// Whether there are no sources to ask.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Source ids in the order they are asked.
    #[must_use]
    pub fn source_ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.id()).collect()
    }

    /// Resolves `code` against the chain.
    ///
    /// * `Found` ends the chain.
    /// * `NotFound` and `TransientError` move on to the next source; the
    ///   error is kept in [`Resolution::transient_errors`].
    /// * `RateLimited` ends the chain and is returned as is.
    /// * An exhausted chain resolves to `NotFound`.
    pub async fn resolve(&self, code: &ValidCode) -> Resolution {
        let mut transient_errors = Vec::new();
        let mut attempts = 0;

        for (i, adapter) in self.adapters.iter().enumerate() {
            if i > 0 && !self.call_delay.is_zero() {
                tokio::time::sleep(self.call_delay).await;
            }

            attempts += 1;
            let outcome = adapter.lookup(code).await;

            match outcome {
                LookupOutcome::Found { .. } => {
                    log::debug!("{code}: found in {}", adapter.id());
                    return Resolution {
                        outcome,
                        transient_errors,
                        attempts,
                    };
                }
                LookupOutcome::RateLimited { .. } => {
                    log::warn!("{code}: rate limited by {}", adapter.id());
                    return Resolution {
                        outcome,
                        transient_errors,
                        attempts,
                    };
                }
                LookupOutcome::NotFound => {
                    log::debug!("{code}: not in {}", adapter.id());
                }
                LookupOutcome::TransientError { detail } => {
                    log::warn!("{code}: {} failed: {detail}", adapter.id());
                    transient_errors.push((adapter.id().to_string(), detail));
                }
            }
        }

        Resolution {
            outcome: LookupOutcome::NotFound,
            transient_errors,
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CallLog, ScriptedSource, code};

    fn orchestrator(sources: Vec<ScriptedSource>) -> LookupOrchestrator {
        LookupOrchestrator::new(
            sources
                .into_iter()
                .map(|s| Box::new(s) as Box<dyn SourceAdapter>)
                .collect(),
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_next_source() {
        let log = CallLog::default();
        let chain = orchestrator(vec![
            ScriptedSource::new("A", &log, |_| LookupOutcome::NotFound),
            ScriptedSource::new("B", &log, |_| LookupOutcome::found("Widget", "B")),
        ]);

        let resolution = chain.resolve(&code("012345678905")).await;

        assert_eq!(resolution.outcome, LookupOutcome::found("Widget", "B"));
        assert_eq!(resolution.attempts, 2);
        assert_eq!(log.sources(), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn first_match_wins() {
        let log = CallLog::default();
        let chain = orchestrator(vec![
            ScriptedSource::new("A", &log, |_| LookupOutcome::found("Widget", "A")),
            ScriptedSource::new("B", &log, |_| LookupOutcome::found("Other", "B")),
        ]);

        let resolution = chain.resolve(&code("012345678905")).await;

        assert_eq!(resolution.outcome, LookupOutcome::found("Widget", "A"));
        assert_eq!(log.sources(), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_stops_the_chain() {
        let log = CallLog::default();
        let chain = orchestrator(vec![
            ScriptedSource::new("A", &log, |_| LookupOutcome::RateLimited {
                source_id: "A".to_string(),
                retry_hint: None,
            }),
            ScriptedSource::new("B", &log, |_| LookupOutcome::found("Widget", "B")),
        ]);

        let resolution = chain.resolve(&code("012345678905")).await;

        assert!(resolution.outcome.is_rate_limited());
        assert_eq!(log.sources(), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_fall_through_to_not_found() {
        let log = CallLog::default();
        let chain = orchestrator(vec![
            ScriptedSource::new("A", &log, |_| LookupOutcome::transient("timeout")),
            ScriptedSource::new("B", &log, |_| LookupOutcome::NotFound),
        ]);

        let resolution = chain.resolve(&code("012345678905")).await;

        assert_eq!(resolution.outcome, LookupOutcome::NotFound);
        assert_eq!(
            resolution.transient_errors,
            vec![("A".to_string(), "timeout".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn waits_between_calls_only() {
        let log = CallLog::default();
        let chain = orchestrator(vec![
            ScriptedSource::new("A", &log, |_| LookupOutcome::NotFound),
            ScriptedSource::new("B", &log, |_| LookupOutcome::NotFound),
            ScriptedSource::new("C", &log, |_| LookupOutcome::NotFound),
        ]);

        let start = tokio::time::Instant::now();
        chain.resolve(&code("012345678905")).await;

        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
