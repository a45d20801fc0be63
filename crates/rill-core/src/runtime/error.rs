//! Error types for the runtime flow-control engine.

use crate::graph::node::Pname;

/// Errors from the scheduler and source contracts.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// `start()` was called while the scheduler was already running.
    #[error("scheduler is already running")]
    AlreadyRunning,

    /// An operation required a running scheduler.
    #[error("scheduler is not running")]
    NotRunning,

    /// A source with this pname is already registered.
    #[error("source {0} is already registered")]
    DuplicateSource(Pname),

    /// A source's read permanently failed.
    ///
    /// The scheduler stops scheduling the source; it does not swallow the
    /// condition (the failure is logged and counted in the metrics).
    #[error("source read failed: {reason}")]
    SourceRead {
        /// Human-readable failure description.
        reason: String,
    },
}
