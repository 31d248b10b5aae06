//! Human approval requests raised by hooks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::ids::{ApprovalId, RunId};

/// Named decision points that may pause a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookType {
    /// Before anything is published externally
    BeforePublish,
    /// Spending above the configured cost threshold
    CostThreshold,
    /// Plan confidence too low to proceed unattended
    LowConfidence,
    /// Irreversible action (deletion, overwrite, external write)
    DestructiveAction,
    /// Error escalated by the classifier
    ErrorEscalation,
}

impl HookType {
    pub const ALL: [HookType; 5] = [
        HookType::BeforePublish,
        HookType::CostThreshold,
        HookType::LowConfidence,
        HookType::DestructiveAction,
        HookType::ErrorEscalation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookType::BeforePublish => "before_publish",
            HookType::CostThreshold => "cost_threshold",
            HookType::LowConfidence => "low_confidence",
            HookType::DestructiveAction => "destructive_action",
            HookType::ErrorEscalation => "error_escalation",
        }
    }
}

impl fmt::Display for HookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Expired,
    Skipped,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Expired => "expired",
            ApprovalStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who resolved an approval, when, and with what
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub resolved_by: String,
    pub resolved_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_data: Option<Value>,
}

impl Resolution {
    pub fn new(resolved_by: impl Into<String>, notes: Option<String>) -> Self {
        Self {
            resolved_by: resolved_by.into(),
            resolved_at: Utc::now(),
            notes,
            modified_data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub id: ApprovalId,
    pub hook_type: HookType,
    pub worker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub context: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl PendingApproval {
    pub fn new(hook_type: HookType, worker: impl Into<String>, context: Value) -> Self {
        Self {
            id: ApprovalId::new(),
            hook_type,
            worker: worker.into(),
            run_id: None,
            context,
            created_at: Utc::now(),
            expires_at: None,
            status: ApprovalStatus::Pending,
            resolution: None,
        }
    }

    pub fn with_run(mut self, run_id: Option<RunId>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn expiring_after(mut self, ttl: chrono::Duration) -> Self {
        self.expires_at = Some(self.created_at + ttl);
        self
    }

    /// True when the stored expiry has passed and nobody resolved it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ApprovalStatus::Pending && self.expires_at.is_some_and(|at| at <= now)
    }

    /// Move to a terminal status. The caller is responsible for checking that
    /// the approval was still pending.
    pub fn resolve(&mut self, status: ApprovalStatus, resolution: Resolution) {
        self.status = status;
        self.resolution = Some(resolution);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expiry_only_applies_while_pending() {
        let mut approval = PendingApproval::new(HookType::BeforePublish, "content", json!({}))
            .expiring_after(chrono::Duration::minutes(5));

        let later = approval.created_at + chrono::Duration::minutes(6);
        assert!(!approval.is_expired_at(approval.created_at));
        assert!(approval.is_expired_at(later));

        approval.resolve(ApprovalStatus::Approved, Resolution::new("ops", None));
        assert!(!approval.is_expired_at(later));
        assert!(approval.status.is_terminal());
    }

    #[test]
    fn hook_type_tags_are_snake_case() {
        for hook in HookType::ALL {
            assert_eq!(serde_json::to_value(hook).unwrap(), json!(hook.as_str()));
        }
    }
}
