use loopwright_core::RunPhase;

use crate::error::RunError;

/// Current phase of one run plus the path it took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    phase: RunPhase,
    history: Vec<RunPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Init,
            history: vec![RunPhase::Init],
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    /// Move to `next`, rejecting edges the state machine does not allow.
    pub fn advance(&mut self, next: RunPhase) -> Result<(), RunError> {
        if !self.phase.can_transition_to(next) {
            return Err(RunError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.history.push(next);
        Ok(())
    }
}
