//! Notification channels fired when an approval is created.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loopwright_core::{ApprovalId, HookType, PendingApproval, RunId, ServiceError};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

/// What a human needs to find and resolve an approval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalNotice {
    pub approval_id: ApprovalId,
    pub hook_type: HookType,
    pub worker: String,
    pub run_id: Option<RunId>,
    pub context: Value,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<&PendingApproval> for ApprovalNotice {
    fn from(approval: &PendingApproval) -> Self {
        Self {
            approval_id: approval.id.clone(),
            hook_type: approval.hook_type,
            worker: approval.worker.clone(),
            run_id: approval.run_id.clone(),
            context: approval.context.clone(),
            expires_at: approval.expires_at,
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn notify(&self, notice: &ApprovalNotice) -> Result<(), ServiceError>;
}

/// Writes each notice as an `info` event
#[derive(Debug, Clone, Copy, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn notify(&self, notice: &ApprovalNotice) -> Result<(), ServiceError> {
        let expires_at = notice.expires_at.map(|at| at.to_rfc3339());
        info!(
            approval_id = %notice.approval_id,
            hook_type = %notice.hook_type,
            worker = %notice.worker,
            run_id = notice.run_id.as_ref().map(|id| id.as_str()),
            expires_at = expires_at.as_deref(),
            context = %notice.context,
            "Approval required"
        );
        Ok(())
    }
}
