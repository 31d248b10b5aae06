//! Run records: phases, plans, observations, results and episodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::ids::RunId;
use crate::objective::Objective;
use crate::services::ErrorDecision;

// ============================================================================
// Run phases
// ============================================================================

/// States of the think → act → observe loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Think,
    Act,
    Observe,
    Complete,
    Error,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::Think => "think",
            RunPhase::Act => "act",
            RunPhase::Observe => "observe",
            RunPhase::Complete => "complete",
            RunPhase::Error => "error",
        }
    }

    /// Legal edges of the state machine.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Init, Think)
                | (Think, Act)
                | (Act, Observe)
                | (Observe, Complete)
                | (Think, Error)
                | (Act, Error)
                | (Observe, Error)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Complete | RunPhase::Error)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Plan / Observation
// ============================================================================

/// Output of the think phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<String>,
    pub reasoning: String,
    pub estimated_cost: f64,
    /// Expected within [0, 1]. Set it through `with_confidence`, read it
    /// through `clamped_confidence` when the plan came from elsewhere.
    pub confidence: f64,
    #[serde(default)]
    pub primitives: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl Plan {
    pub fn new<S: Into<String>>(steps: impl IntoIterator<Item = S>, reasoning: impl Into<String>) -> Self {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
            reasoning: reasoning.into(),
            estimated_cost: 0.0,
            confidence: 0.5,
            primitives: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_estimated_cost(mut self, cost: f64) -> Self {
        self.estimated_cost = cost.max(0.0);
        self
    }

    /// Confidence is clamped into [0, 1]; NaN becomes 0.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = unit_interval(confidence);
        self
    }

    /// `confidence` forced into [0, 1], for plans built as struct literals
    /// or deserialized
    pub fn clamped_confidence(&self) -> f64 {
        unit_interval(self.confidence)
    }

    pub fn with_primitives<S: Into<String>>(mut self, primitives: impl IntoIterator<Item = S>) -> Self {
        self.primitives = primitives.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<S: Into<String>>(mut self, workers: impl IntoIterator<Item = S>) -> Self {
        self.dependencies = workers.into_iter().map(Into::into).collect();
        self
    }
}

fn unit_interval(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Output of the observe phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub success: bool,
    pub outcome: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub needs_follow_up: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_context: Option<Map<String, Value>>,
}

impl Observation {
    pub fn new(success: bool, outcome: impl Into<String>) -> Self {
        Self {
            success,
            outcome: outcome.into(),
            metrics: BTreeMap::new(),
            learnings: Vec::new(),
            needs_follow_up: false,
            follow_up_context: None,
        }
    }

    pub fn success(outcome: impl Into<String>) -> Self {
        Self::new(true, outcome)
    }

    pub fn failure(outcome: impl Into<String>) -> Self {
        Self::new(false, outcome)
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_learning(mut self, lesson: impl Into<String>) -> Self {
        self.learnings.push(lesson.into());
        self
    }

    /// Mark the run as needing follow-up work with the given context.
    pub fn with_follow_up(mut self, context: Map<String, Value>) -> Self {
        self.needs_follow_up = true;
        self.follow_up_context = Some(context);
        self
    }
}

// ============================================================================
// RunResult / Episode
// ============================================================================

/// Full record of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub worker: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Decision taken by the error classifier when the run failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<ErrorDecision>,
}

impl RunResult {
    pub fn new(run_id: RunId, worker: impl Into<String>) -> Self {
        Self {
            run_id,
            worker: worker.into(),
            success: false,
            output: Value::Null,
            plan: None,
            observation: None,
            started_at: Utc::now(),
            completed_at: None,
            cost: 0.0,
            error: None,
            recovery: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Persisted form of a [`RunResult`] plus the objective that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub run_id: RunId,
    pub worker: String,
    pub objective: Objective,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<ErrorDecision>,
}

impl Episode {
    pub fn from_result(result: &RunResult, objective: &Objective) -> Self {
        Self {
            run_id: result.run_id.clone(),
            worker: result.worker.clone(),
            objective: objective.clone(),
            success: result.success,
            output: result.output.clone(),
            plan: result.plan.clone(),
            observation: result.observation.clone(),
            started_at: result.started_at,
            completed_at: result.completed_at,
            cost: result.cost,
            error: result.error.clone(),
            recovery: result.recovery.clone(),
        }
    }

    /// Rebuild the run result without re-executing anything.
    pub fn to_result(&self) -> RunResult {
        RunResult {
            run_id: self.run_id.clone(),
            worker: self.worker.clone(),
            success: self.success,
            output: self.output.clone(),
            plan: self.plan.clone(),
            observation: self.observation.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            cost: self.cost,
            error: self.error.clone(),
            recovery: self.recovery.clone(),
        }
    }

    /// Follow-up context when the observation asked for more work.
    ///
    /// A follow-up request without explicit context yields an empty map.
    pub fn follow_up(&self) -> Option<Map<String, Value>> {
        let observation = self.observation.as_ref()?;
        if !observation.needs_follow_up {
            return None;
        }
        Some(observation.follow_up_context.clone().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transitions_follow_the_loop() {
        use RunPhase::*;
        assert!(Init.can_transition_to(Think));
        assert!(Think.can_transition_to(Act));
        assert!(Act.can_transition_to(Observe));
        assert!(Observe.can_transition_to(Complete));
        for phase in [Think, Act, Observe] {
            assert!(phase.can_transition_to(Error));
        }

        assert!(!Init.can_transition_to(Act));
        assert!(!Init.can_transition_to(Error));
        assert!(!Complete.can_transition_to(Think));
        assert!(!Error.can_transition_to(Think));
        assert!(!Act.can_transition_to(Think));
    }

    #[test]
    fn plan_confidence_is_clamped() {
        assert_eq!(Plan::new(["a"], "r").with_confidence(1.7).confidence, 1.0);
        assert_eq!(Plan::new(["a"], "r").with_confidence(-0.2).confidence, 0.0);
        assert_eq!(Plan::new(["a"], "r").with_confidence(f64::NAN).confidence, 0.0);
    }

    #[test]
    fn episode_follow_up_context() {
        let mut result = RunResult::new(RunId::new(), "research");
        let objective = Objective::new().with("topic", "wasm");

        assert_eq!(Episode::from_result(&result, &objective).follow_up(), None);

        let mut ctx = Map::new();
        ctx.insert("page".into(), json!(2));
        result.observation = Some(Observation::success("partial").with_follow_up(ctx.clone()));
        let episode = Episode::from_result(&result, &objective);
        assert_eq!(episode.follow_up(), Some(ctx));

        let mut bare = Observation::success("more");
        bare.needs_follow_up = true;
        result.observation = Some(bare);
        assert_eq!(
            Episode::from_result(&result, &objective).follow_up(),
            Some(Map::new())
        );
    }

    #[test]
    fn episode_reconstructs_result() {
        let mut result = RunResult::new(RunId::new(), "content");
        result.success = true;
        result.output = json!({"draft": "hello"});
        result.cost = 0.42;
        result.completed_at = Some(Utc::now());

        let episode = Episode::from_result(&result, &Objective::new());
        assert_eq!(episode.to_result(), result);
    }
}
