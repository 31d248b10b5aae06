//! Run loop errors

use loopwright_core::{RunId, RunPhase};
use thiserror::Error;

/// Error type workers return from their phases
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum RunError {
    /// The classifier chose to escalate. `source` is the worker's own error.
    #[error("Run {run_id} escalated in {phase} phase: {source}")]
    Escalated {
        run_id: RunId,
        phase: RunPhase,
        #[source]
        source: BoxError,
    },

    #[error("Episode not found: {0}")]
    EpisodeNotFound(RunId),

    #[error("Invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: RunPhase, to: RunPhase },
}

impl RunError {
    pub fn phase(&self) -> Option<RunPhase> {
        match self {
            RunError::Escalated { phase, .. } => Some(*phase),
            RunError::InvalidTransition { from, .. } => Some(*from),
            RunError::EpisodeNotFound(_) => None,
        }
    }
}
