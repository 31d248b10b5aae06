//! Approval state machine.
//!
//! `check_hook` decides whether a decision point needs a human. When it
//! does, a [`PendingApproval`] is persisted and the caller receives
//! [`HookDecision::Pause`]. The approval then moves once from `pending` to
//! a terminal status, either through [`HookRegistry::approve`] /
//! [`HookRegistry::reject`] or by expiring.

use chrono::Utc;
use loopwright_core::{
    ApprovalId, ApprovalStatus, ApprovalStore, HookConfig, HookType, HooksConfig, PendingApproval,
    Resolution, RunId,
};
use loopwright_observability::RuntimeMetrics;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{HookError, HookResult};
use crate::notify::{ApprovalNotice, LogChannel, NotificationChannel};

/// Resolver recorded when the registry expires an approval itself
pub const SYSTEM_RESOLVER: &str = "system";

/// Expiry used when a configured timeout does not fit a chrono duration
const FALLBACK_TTL_DAYS: i64 = 365;

// ============================================================================
// Request / decision
// ============================================================================

/// Facts about the decision point being checked
#[derive(Debug, Clone, PartialEq)]
pub struct HookRequest {
    pub worker: String,
    pub run_id: Option<RunId>,
    pub context: Value,
    pub confidence: Option<f64>,
    pub cost: Option<f64>,
}

impl HookRequest {
    pub fn new(worker: impl Into<String>, context: Value) -> Self {
        Self {
            worker: worker.into(),
            run_id: None,
            context,
            confidence: None,
            cost: None,
        }
    }

    pub fn with_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    /// Proceed unchanged
    Continue,
    /// A human must decide; wait on this approval
    Pause { approval_id: ApprovalId },
    /// A human rejected the action
    Abort { notes: Option<String> },
    /// Leave the action out and carry on
    Skip,
    /// Proceed with the data the approver supplied instead
    Modify(Value),
}

impl HookDecision {
    pub fn is_continue(&self) -> bool {
        matches!(self, HookDecision::Continue)
    }

    pub fn approval_id(&self) -> Option<&ApprovalId> {
        match self {
            HookDecision::Pause { approval_id } => Some(approval_id),
            _ => None,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

pub struct HookRegistry {
    store: Arc<dyn ApprovalStore>,
    config: HooksConfig,
    channels: HashMap<String, Arc<dyn NotificationChannel>>,
    metrics: Option<Arc<RuntimeMetrics>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<&String> = self.channels.keys().collect();
        channels.sort();
        f.debug_struct("HookRegistry")
            .field("config", &self.config)
            .field("channels", &channels)
            .finish()
    }
}

impl HookRegistry {
    /// Registry with the built-in `log` channel registered
    pub fn new(store: Arc<dyn ApprovalStore>, config: HooksConfig) -> Self {
        let mut channels: HashMap<String, Arc<dyn NotificationChannel>> = HashMap::new();
        channels.insert("log".to_string(), Arc::new(LogChannel));
        Self {
            store,
            config,
            channels,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register (or replace) a channel under `name`
    pub fn register_channel(&mut self, name: impl Into<String>, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(name.into(), channel);
    }

    pub fn config(&self) -> &HooksConfig {
        &self.config
    }

    pub fn config_for(&self, hook_type: HookType) -> &HookConfig {
        self.config.for_type(hook_type)
    }

    /// Decide whether `hook_type` needs a human for this request.
    ///
    /// Returns `Continue` when the hook is disabled, when auto-approval is on
    /// and the supplied confidence reaches the threshold, or for cost hooks
    /// when the supplied cost is under the threshold. Otherwise an approval is
    /// created and announced, and `Pause` is returned even if persisting it
    /// failed.
    pub async fn check_hook(&self, hook_type: HookType, request: HookRequest) -> HookDecision {
        let config = self.config.for_type(hook_type);

        if !config.enabled {
            return HookDecision::Continue;
        }
        if config.auto_approve
            && request
                .confidence
                .is_some_and(|c| c >= config.confidence_threshold)
        {
            debug!(hook_type = %hook_type, worker = %request.worker, confidence = ?request.confidence, "Auto-approved");
            return HookDecision::Continue;
        }
        if hook_type == HookType::CostThreshold
            && request.cost.is_some_and(|c| c < config.cost_threshold)
        {
            debug!(worker = %request.worker, cost = ?request.cost, "Cost under threshold");
            return HookDecision::Continue;
        }

        let ttl = chrono::Duration::from_std(config.timeout)
            .unwrap_or_else(|_| chrono::Duration::days(FALLBACK_TTL_DAYS));
        let approval = PendingApproval::new(hook_type, request.worker, request.context)
            .with_run(request.run_id)
            .expiring_after(ttl);

        if let Err(e) = self.store.insert_approval(&approval).await {
            warn!(approval_id = %approval.id, hook_type = %hook_type, error = %e, "Failed to persist approval");
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_approval_requested(hook_type.as_str());
        }
        info!(approval_id = %approval.id, hook_type = %hook_type, worker = %approval.worker, "Approval requested");

        self.notify(config, &approval).await;
        HookDecision::Pause {
            approval_id: approval.id,
        }
    }

    async fn notify(&self, config: &HookConfig, approval: &PendingApproval) {
        let notice = ApprovalNotice::from(approval);
        for name in &config.notification_channels {
            let Some(channel) = self.channels.get(name) else {
                warn!(channel = %name, "Unknown notification channel");
                continue;
            };
            if let Err(e) = channel.notify(&notice).await {
                warn!(channel = %name, approval_id = %approval.id, error = %e, "Notification failed");
            }
        }
    }

    /// Poll approval `id` until it is resolved or `timeout` elapses.
    ///
    /// An approval whose stored expiry passes while pending is marked
    /// expired. When the poll timeout elapses first the approval is forced
    /// to expired. Both cases, and an approval that cannot be found, yield
    /// `Continue`.
    pub async fn wait_for_approval(
        &self,
        id: &ApprovalId,
        timeout: Duration,
        poll_interval: Duration,
    ) -> HookDecision {
        let deadline = Instant::now() + timeout;
        loop {
            let current = match self.store.get_approval(id).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(approval_id = %id, error = %e, "Failed to poll approval");
                    None
                }
            };

            if let Some(approval) = &current {
                match approval.status {
                    ApprovalStatus::Pending if approval.is_expired_at(Utc::now()) => {
                        self.mark_expired(approval.clone(), "expired").await;
                        return HookDecision::Continue;
                    }
                    ApprovalStatus::Pending => {}
                    _ => return decision_for(approval),
                }
            }

            let now = Instant::now();
            if now >= deadline {
                if let Some(approval) = current {
                    self.mark_expired(approval, "wait timed out").await;
                } else {
                    debug!(approval_id = %id, "Approval never found, continuing");
                }
                return HookDecision::Continue;
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    async fn mark_expired(&self, mut approval: PendingApproval, reason: &str) {
        approval.resolve(
            ApprovalStatus::Expired,
            Resolution::new(SYSTEM_RESOLVER, Some(reason.to_string())),
        );
        match self.store.update_approval(&approval).await {
            Ok(_) => info!(approval_id = %approval.id, reason, "Approval expired"),
            Err(e) => warn!(approval_id = %approval.id, error = %e, "Failed to mark approval expired"),
        }
    }

    pub async fn approve(
        &self,
        id: &ApprovalId,
        approver: &str,
        notes: Option<String>,
        modified_data: Option<Value>,
    ) -> HookResult<PendingApproval> {
        let mut resolution = Resolution::new(approver, notes);
        resolution.modified_data = modified_data;
        self.resolve(id, ApprovalStatus::Approved, resolution).await
    }

    pub async fn reject(
        &self,
        id: &ApprovalId,
        approver: &str,
        notes: Option<String>,
    ) -> HookResult<PendingApproval> {
        self.resolve(id, ApprovalStatus::Rejected, Resolution::new(approver, notes))
            .await
    }

    /// Read, check still pending, write back. Two resolvers racing on the
    /// same approval are not arbitrated.
    async fn resolve(
        &self,
        id: &ApprovalId,
        status: ApprovalStatus,
        resolution: Resolution,
    ) -> HookResult<PendingApproval> {
        let mut approval = self
            .store
            .get_approval(id)
            .await?
            .ok_or_else(|| HookError::ApprovalNotFound(id.clone()))?;

        if approval.status.is_terminal() {
            return Err(HookError::AlreadyResolved {
                id: id.clone(),
                status: approval.status,
            });
        }

        let resolved_by = resolution.resolved_by.clone();
        approval.resolve(status, resolution);
        if !self.store.update_approval(&approval).await? {
            return Err(HookError::ApprovalNotFound(id.clone()));
        }
        info!(approval_id = %id, status = %status, resolved_by = %resolved_by, "Approval resolved");
        Ok(approval)
    }

    /// Pending approvals, oldest first, optionally for one worker
    pub async fn list_pending(&self, worker: Option<&str>) -> HookResult<Vec<PendingApproval>> {
        Ok(self
            .store
            .list_approvals(Some(ApprovalStatus::Pending), worker)
            .await?)
    }

    /// Expire every pending approval whose stored expiry has passed.
    /// Returns how many were expired.
    pub async fn expire_stale(&self) -> HookResult<usize> {
        let now = Utc::now();
        let stale: Vec<PendingApproval> = self
            .list_pending(None)
            .await?
            .into_iter()
            .filter(|approval| approval.is_expired_at(now))
            .collect();

        let count = stale.len();
        for approval in stale {
            self.mark_expired(approval, "expired").await;
        }
        if count > 0 {
            info!(count, "Expired stale approvals");
        }
        Ok(count)
    }
}

fn decision_for(approval: &PendingApproval) -> HookDecision {
    let resolution = approval.resolution.as_ref();
    match approval.status {
        ApprovalStatus::Approved => match resolution.and_then(|r| r.modified_data.clone()) {
            Some(data) => HookDecision::Modify(data),
            None => HookDecision::Continue,
        },
        ApprovalStatus::Rejected => HookDecision::Abort {
            notes: resolution.and_then(|r| r.notes.clone()),
        },
        ApprovalStatus::Skipped => HookDecision::Skip,
        ApprovalStatus::Expired | ApprovalStatus::Pending => HookDecision::Continue,
    }
}
