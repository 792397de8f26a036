use thiserror::Error;

use crate::events::NormalizeError;
use crate::model::Phase;
use crate::scheduler::SchedulerError;
use crate::store::StoreError;

/// Errors surfaced by the core. Variants split into two classes: transient
/// infrastructure failures that deserve a backoff retry, and everything
/// else, which is fatal for the item it concerns.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    /// The scan spec can never be scheduled as written. Not retriable.
    #[error("invalid scan spec: {0}")]
    InvalidSpec(String),

    /// Internal guard: a reconcile attempted a backwards phase move.
    #[error("phase transition {from} -> {to} is not allowed")]
    PhaseTransition { from: Phase, to: Phase },
}

impl Error {
    /// Whether a retry with backoff can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Store(e) => e.is_transient(),
            Error::Scheduler(e) => e.is_transient(),
            Error::Normalize(_) => false,
            Error::InvalidSpec(_) => false,
            Error::PhaseTransition { .. } => false,
        }
    }
}
