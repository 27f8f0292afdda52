//! Progress reporting for verification runs.
//!
//! The run controller reports through [`ProgressCallback`] so it never
//! depends on a rendering backend. The CLI plugs in an `indicatif` bar;
//! tests and library callers use [`NullProgress`].

use std::sync::Arc;

/// Receives progress updates from a verification run.
///
/// Implementations must be `Send + Sync` so a run future holding one can
/// be spawned onto the runtime.
pub trait ProgressCallback: Send + Sync {
    /// Set the number of codes the run will walk through.
    fn set_total(&self, total: u64);

    /// Advance by `delta` codes.
    fn inc(&self, delta: u64);

    /// Update the message shown next to the indicator (current code,
    /// running counts).
    fn set_message(&self, msg: String);

    /// Mark the run as finished with a final message.
    fn finish(&self, msg: String);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
