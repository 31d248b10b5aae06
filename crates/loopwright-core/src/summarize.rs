//! Span attribute extraction.

use serde_json::{Map, Value, json};

use crate::objective::Objective;
use crate::run::{Observation, Plan, RunResult};
use crate::services::ErrorDecision;

/// Values that can describe themselves as span attributes.
pub trait Summarize {
    fn summarize(&self) -> Map<String, Value>;
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

impl Summarize for Plan {
    fn summarize(&self) -> Map<String, Value> {
        object(json!({
            "steps": self.steps,
            "step_count": self.steps.len(),
            "reasoning": self.reasoning,
            "estimated_cost": self.estimated_cost,
            "confidence": self.clamped_confidence(),
            "primitives": self.primitives,
            "dependencies": self.dependencies,
        }))
    }
}

impl Summarize for Observation {
    fn summarize(&self) -> Map<String, Value> {
        object(json!({
            "success": self.success,
            "outcome": self.outcome,
            "metrics": self.metrics,
            "learnings": self.learnings,
            "needs_follow_up": self.needs_follow_up,
        }))
    }
}

impl Summarize for RunResult {
    fn summarize(&self) -> Map<String, Value> {
        let mut attrs = object(json!({
            "run_id": self.run_id,
            "worker": self.worker,
            "success": self.success,
            "cost": self.cost,
        }));
        if let Some(duration) = self.duration() {
            attrs.insert("duration_ms".into(), json!(duration.num_milliseconds()));
        }
        if let Some(error) = &self.error {
            attrs.insert("error".into(), json!(error));
        }
        attrs
    }
}

impl Summarize for ErrorDecision {
    fn summarize(&self) -> Map<String, Value> {
        let mut attrs = object(json!({
            "action": self.action.as_str(),
            "reason": self.reason,
            "should_alert": self.should_alert,
        }));
        if let Some(delay) = self.retry_after {
            attrs.insert("retry_after_ms".into(), json!(delay.as_millis() as u64));
        }
        if let Some(fallback) = &self.fallback_value {
            attrs.insert("fallback_value".into(), fallback.clone());
        }
        attrs
    }
}

impl Summarize for Objective {
    fn summarize(&self) -> Map<String, Value> {
        self.as_map().clone()
    }
}

/// Objects contribute their fields; anything else lands under `value`.
impl Summarize for Value {
    fn summarize(&self) -> Map<String, Value> {
        object(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::RunId;

    #[test]
    fn scalars_are_wrapped() {
        assert_eq!(json!(3).summarize().get("value"), Some(&json!(3)));
        let attrs = json!({"rows": 10}).summarize();
        assert_eq!(attrs.get("rows"), Some(&json!(10)));
        assert!(!attrs.contains_key("value"));
    }

    #[test]
    fn plan_summary_has_confidence_and_steps() {
        let attrs = Plan::new(["search", "rank"], "two steps")
            .with_confidence(0.7)
            .summarize();
        assert_eq!(attrs["step_count"], json!(2));
        assert_eq!(attrs["confidence"], json!(0.7));
    }

    #[test]
    fn plan_summary_clamps_literal_confidence() {
        let mut plan = Plan::new(["guess"], "overconfident");
        plan.confidence = 4.2;
        assert_eq!(plan.summarize()["confidence"], json!(1.0));
        plan.confidence = f64::NAN;
        assert_eq!(plan.summarize()["confidence"], json!(0.0));
        plan.confidence = -0.3;
        assert_eq!(plan.clamped_confidence(), 0.0);
    }

    #[test]
    fn result_summary_includes_error_only_when_failed() {
        let mut result = RunResult::new(RunId::new(), "quality");
        assert!(!result.summarize().contains_key("error"));
        result.error = Some("boom".into());
        assert_eq!(result.summarize()["error"], json!("boom"));
    }
}
