//! Error types for approval handling

use loopwright_core::{ApprovalId, ApprovalStatus, StoreError};
use thiserror::Error;

pub type HookResult<T> = Result<T, HookError>;

#[derive(Error, Debug)]
pub enum HookError {
    #[error("Approval not found: {0}")]
    ApprovalNotFound(ApprovalId),

    /// The approval left `pending` before this resolution arrived
    #[error("Approval {id} already resolved as {status}")]
    AlreadyResolved {
        id: ApprovalId,
        status: ApprovalStatus,
    },

    #[error("Approval store error: {0}")]
    Store(#[from] StoreError),
}
