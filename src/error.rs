//! Construction-time errors (spec.md §7, "Programmer faults" excepted — those
//! are logged and discarded in place, never surfaced as a `Result`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("a run needs at least one proposer")]
    NoProposers,

    #[error("a run needs at least one acceptor")]
    NoAcceptors,

    #[error("a run needs at least one learner")]
    NoLearners,

    #[error("drop_rate must be within [0.0, 1.0], got {0}")]
    InvalidDropRate(f64),

    #[error("delay_range min ({min:?}) must not exceed max ({max:?})")]
    InvalidDelayRange {
        min: std::time::Duration,
        max: std::time::Duration,
    },

    #[error("crash_schedule names {0}, which is not a node in this run")]
    UnknownCrashTarget(crate::node::NodeId),
}
