//! Scripted sources for exercising the pipeline without a network.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use upc_verify_models::{LookupOutcome, ValidCode};
use upc_verify_source::SourceAdapter;

type Responder = Box<dyn Fn(&ValidCode) -> LookupOutcome + Send + Sync>;

/// Shared record of `(source_id, code, time)` for every lookup made.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<(String, String, tokio::time::Instant)>>>);

impl CallLog {
    fn push(&self, source_id: &str, code: &ValidCode) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((
                source_id.to_string(),
                code.to_string(),
                tokio::time::Instant::now(),
            ));
    }

    fn calls(&self) -> Vec<(String, String, tokio::time::Instant)> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Source ids in call order.
    pub fn sources(&self) -> Vec<String> {
        self.calls().into_iter().map(|(source, _, _)| source).collect()
    }

    /// Codes in call order.
    pub fn codes(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, code, _)| code).collect()
    }

    /// Time between consecutive calls.
    pub fn gaps(&self) -> Vec<std::time::Duration> {
        self.calls()
            .windows(2)
            .map(|pair| pair[1].2 - pair[0].2)
            .collect()
    }
}

/// A source whose answers come from a closure.
pub struct ScriptedSource {
    id: String,
    log: CallLog,
    respond: Responder,
}

impl ScriptedSource {
    pub fn new(
        id: &str,
        log: &CallLog,
        respond: impl Fn(&ValidCode) -> LookupOutcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.to_string(),
            log: log.clone(),
            respond: Box::new(respond),
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.id
    }

    async fn lookup(&self, code: &ValidCode) -> LookupOutcome {
        self.log.push(&self.id, code);
        (self.respond)(code)
    }
}

/// Parses a code that is known to be valid.
pub fn code(raw: &str) -> ValidCode {
    ValidCode::parse(raw).unwrap()
}

/// `n` distinct valid codes.
pub fn codes(n: usize) -> Vec<ValidCode> {
    (0..n).map(|i| code(&format!("{:012}", 100_000_000_000 + i))).collect()
}
