//! Contracts for the external services the runtime consults.
//!
//! Both services are opaque, possibly slow and possibly failing. Callers
//! must never let a service failure abort a run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::ServiceError;
use crate::ids::RunId;
use crate::objective::Objective;
use crate::pattern::PatternCandidate;
use crate::run::RunPhase;

// ============================================================================
// Error classification
// ============================================================================

/// Recovery action recommended for a failed phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    Skip,
    Escalate,
    Fallback,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::Retry => "retry",
            RecoveryAction::Skip => "skip",
            RecoveryAction::Escalate => "escalate",
            RecoveryAction::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision returned by an [`ErrorClassifier`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDecision {
    pub action: RecoveryAction,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "opt_duration")]
    pub retry_after: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_value: Option<Value>,
    #[serde(default)]
    pub should_alert: bool,
}

impl ErrorDecision {
    pub fn new(action: RecoveryAction, reason: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
            retry_after: None,
            fallback_value: None,
            should_alert: false,
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::new(RecoveryAction::Skip, reason)
    }

    pub fn escalate(reason: impl Into<String>) -> Self {
        Self::new(RecoveryAction::Escalate, reason).with_alert()
    }

    pub fn retry_after(reason: impl Into<String>, delay: Duration) -> Self {
        let mut decision = Self::new(RecoveryAction::Retry, reason);
        decision.retry_after = Some(delay);
        decision
    }

    pub fn fallback(reason: impl Into<String>, value: Value) -> Self {
        let mut decision = Self::new(RecoveryAction::Fallback, reason);
        decision.fallback_value = Some(value);
        decision
    }

    pub fn with_alert(mut self) -> Self {
        self.should_alert = true;
        self
    }

    pub fn is_escalation(&self) -> bool {
        self.action == RecoveryAction::Escalate
    }
}

mod opt_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis().min(u64::MAX as u128) as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Where a failure happened
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub worker: String,
    pub objective: Objective,
    pub run_id: RunId,
    pub phase: RunPhase,
}

/// Classifies worker-logic failures into a recovery decision.
#[async_trait]
pub trait ErrorClassifier: Send + Sync {
    async fn classify(
        &self,
        description: &str,
        context: &ErrorContext,
    ) -> Result<ErrorDecision, ServiceError>;
}

/// Keyword-based classifier used when no external service is wired in.
///
/// Transient failures (timeouts, connection problems, rate limits) are
/// retried, authorization and validation failures escalate, and anything
/// else is skipped.
#[derive(Debug, Clone)]
pub struct RuleBasedClassifier {
    retry_delay: Duration,
    transient: Vec<String>,
    fatal: Vec<String>,
}

impl Default for RuleBasedClassifier {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(30),
            transient: ["timeout", "timed out", "connection", "rate limit", "unavailable"]
                .into_iter()
                .map(String::from)
                .collect(),
            fatal: ["permission", "unauthorized", "forbidden", "invalid", "corrupt"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl RuleBasedClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Add a keyword that forces escalation
    pub fn escalate_on(mut self, keyword: impl Into<String>) -> Self {
        self.fatal.push(keyword.into().to_lowercase());
        self
    }

    pub fn decide(&self, description: &str, context: &ErrorContext) -> ErrorDecision {
        let lowered = description.to_lowercase();

        if let Some(keyword) = self.fatal.iter().find(|k| lowered.contains(k.as_str())) {
            return ErrorDecision::escalate(format!(
                "{} failed in {} phase with non-recoverable error ({keyword})",
                context.worker, context.phase
            ));
        }

        if let Some(keyword) = self.transient.iter().find(|k| lowered.contains(k.as_str())) {
            return ErrorDecision::retry_after(
                format!("transient failure ({keyword})"),
                self.retry_delay,
            );
        }

        ErrorDecision::skip(format!("unclassified failure in {} phase", context.phase))
    }
}

#[async_trait]
impl ErrorClassifier for RuleBasedClassifier {
    async fn classify(
        &self,
        description: &str,
        context: &ErrorContext,
    ) -> Result<ErrorDecision, ServiceError> {
        Ok(self.decide(description, context))
    }
}

// ============================================================================
// Pattern learning
// ============================================================================

/// Turns one observed outcome into a candidate pattern.
#[async_trait]
pub trait PatternLearner: Send + Sync {
    async fn learn(
        &self,
        action: &str,
        inputs: &Value,
        result: &Value,
        success: bool,
    ) -> Result<PatternCandidate, ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(phase: RunPhase) -> ErrorContext {
        ErrorContext {
            worker: "research".into(),
            objective: Objective::new().with("topic", "rust"),
            run_id: RunId::new(),
            phase,
        }
    }

    #[tokio::test]
    async fn rule_based_classifier_buckets_errors() {
        let classifier = RuleBasedClassifier::new().with_retry_delay(Duration::from_secs(5));

        let retry = classifier
            .classify("upstream connection reset", &context(RunPhase::Act))
            .await
            .unwrap();
        assert_eq!(retry.action, RecoveryAction::Retry);
        assert_eq!(retry.retry_after, Some(Duration::from_secs(5)));

        let escalate = classifier
            .classify("Permission denied writing draft", &context(RunPhase::Act))
            .await
            .unwrap();
        assert!(escalate.is_escalation());
        assert!(escalate.should_alert);

        let skip = classifier
            .classify("no results", &context(RunPhase::Observe))
            .await
            .unwrap();
        assert_eq!(skip.action, RecoveryAction::Skip);
    }

    #[test]
    fn custom_escalation_keyword() {
        let classifier = RuleBasedClassifier::new().escalate_on("Budget");
        let decision = classifier.decide("budget exhausted", &context(RunPhase::Think));
        assert!(decision.is_escalation());
    }

    #[test]
    fn decision_serializes_retry_delay_as_millis() {
        let decision = ErrorDecision::retry_after("slow", Duration::from_millis(1500));
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["action"], "retry");
        assert_eq!(json["retry_after"], 1500);

        let back: ErrorDecision = serde_json::from_value(json).unwrap();
        assert_eq!(back, decision);
    }

    #[test]
    fn oversized_retry_delay_saturates() {
        let decision = ErrorDecision::retry_after("never", Duration::MAX);
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["retry_after"], u64::MAX);

        let back: ErrorDecision = serde_json::from_value(json).unwrap();
        assert_eq!(back.retry_after, Some(Duration::from_millis(u64::MAX)));
    }
}
