//! The think → act → observe loop.
//!
//! One [`AgentRunner`] drives one worker. Every run:
//!
//! 1. opens a root span and walks `INIT → THINK → ACT → OBSERVE → COMPLETE`,
//!    recording a span after each phase;
//! 2. on a worker error enters `ERROR`, asks the classifier what to do and
//!    records its decision as an `error` span;
//! 3. always closes the trace, stores the episode, clears the working tier
//!    and records metrics, whatever the outcome.
//!
//! Only an `Escalate` decision turns a worker error into an `Err` for the
//! caller. Every other failure comes back as a `RunResult` with
//! `success = false`.

use chrono::Utc;
use loopwright_core::{
    Episode, ErrorClassifier, ErrorContext, ErrorDecision, Objective, RecoveryAction,
    RuleBasedClassifier, RunId, RunPhase, RunResult, Span, Store,
};
use loopwright_hooks::HookRegistry;
use loopwright_memory::AgentMemory;
use loopwright_mesh::Coordinator;
use loopwright_observability::{RunOutcome, RuntimeMetrics, Tracer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::error::{BoxError, RunError};
use crate::state::PhaseTracker;
use crate::worker::Worker;

pub struct AgentRunner<W: Worker> {
    worker: W,
    memory: AgentMemory,
    tracer: Tracer,
    classifier: Arc<dyn ErrorClassifier>,
    hooks: Option<Arc<HookRegistry>>,
    coordinator: Option<Arc<Coordinator>>,
    metrics: Option<Arc<RuntimeMetrics>>,
    last_trace: Vec<Span>,
}

impl<W: Worker> std::fmt::Debug for AgentRunner<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRunner")
            .field("worker", &self.worker.name())
            .field("memory", &self.memory)
            .field("tracer", &self.tracer)
            .field("hooks", &self.hooks.is_some())
            .field("coordinator", &self.coordinator.is_some())
            .finish()
    }
}

/// Worker-side failure or a broken state machine
enum PhaseFailure {
    Worker { phase: RunPhase, error: BoxError },
    Transition(RunError),
}

impl From<RunError> for PhaseFailure {
    fn from(err: RunError) -> Self {
        PhaseFailure::Transition(err)
    }
}

impl<W: Worker> AgentRunner<W> {
    /// Runner with an in-process tracer and the rule-based classifier
    pub fn new(worker: W, memory: AgentMemory) -> Self {
        let tracer = Tracer::new(worker.name());
        Self {
            worker,
            memory,
            tracer,
            classifier: Arc::new(RuleBasedClassifier::default()),
            hooks: None,
            coordinator: None,
            metrics: None,
            last_trace: Vec::new(),
        }
    }

    /// Memory and span persistence backed by one store
    pub fn with_store<S: Store + 'static>(worker: W, store: Arc<S>) -> Self {
        let memory = AgentMemory::with_store(worker.name(), store.clone());
        let tracer = Tracer::new(worker.name()).with_store(store);
        Self::new(worker, memory).with_tracer(tracer)
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_coordinator(mut self, coordinator: Arc<Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RuntimeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut AgentMemory {
        &mut self.memory
    }

    /// Spans of the most recent run, as flushed by the tracer
    pub fn last_trace(&self) -> &[Span] {
        &self.last_trace
    }

    /// Execute one full run for `objective`.
    pub async fn run(&mut self, objective: Objective) -> Result<RunResult, RunError> {
        let run_id = RunId::new();
        let clock = Instant::now();
        let worker_name = self.worker.name().to_string();
        info!(worker = %worker_name, run_id = %run_id, "Run started");

        let Self {
            worker,
            memory,
            tracer,
            classifier,
            hooks,
            coordinator,
            metrics,
            last_trace,
        } = self;

        tracer.start_run(run_id.clone(), &objective);
        let mut result = RunResult::new(run_id.clone(), &worker_name);
        let mut phases = PhaseTracker::new();
        let mut ctx = RunContext::new(run_id.clone(), memory, tracer)
            .with_hooks(hooks.as_deref())
            .with_coordinator(coordinator.as_deref());

        let mut outcome = RunOutcome::Success;
        let mut fatal = None;

        match execute(&*worker, &objective, &mut ctx, &mut phases, &mut result).await {
            Ok(()) if result.success => {}
            Ok(()) => outcome = RunOutcome::Failure,
            Err(PhaseFailure::Worker { phase, error: cause }) => {
                if let Err(e) = phases.advance(RunPhase::Error) {
                    warn!(run_id = %run_id, error = %e, "Unexpected phase on failure");
                }
                let description = cause.to_string();
                let context = ErrorContext {
                    worker: worker_name.clone(),
                    objective: objective.clone(),
                    run_id: run_id.clone(),
                    phase,
                };
                let decision = classify(&**classifier, &description, &context).await;
                ctx.flush_primitive_calls();
                ctx.tracer_mut().log_error(&description, &decision);
                if let Some(metrics) = metrics.as_deref() {
                    metrics.record_phase_error(phase.as_str());
                }

                result.success = false;
                result.error = Some(description.clone());
                result.recovery = Some(decision.clone());

                if decision.action == RecoveryAction::Escalate {
                    error!(
                        worker = %worker_name,
                        run_id = %run_id,
                        phase = %phase,
                        error = %description,
                        reason = %decision.reason,
                        "Run escalated"
                    );
                    outcome = RunOutcome::Escalated;
                    fatal = Some(RunError::Escalated {
                        run_id: run_id.clone(),
                        phase,
                        source: cause,
                    });
                } else {
                    warn!(
                        worker = %worker_name,
                        run_id = %run_id,
                        phase = %phase,
                        error = %description,
                        action = decision.action.as_str(),
                        "Run failed"
                    );
                    outcome = RunOutcome::Failure;
                }
            }
            Err(PhaseFailure::Transition(e)) => {
                result.success = false;
                result.error = Some(e.to_string());
                outcome = RunOutcome::Failure;
                fatal = Some(e);
            }
        }

        result.cost = ctx.cost();
        drop(ctx);
        result.completed_at = Some(Utc::now());

        let spans = tracer.end_run(&result).await;
        memory
            .store_episode(&Episode::from_result(&result, &objective))
            .await;
        memory.clear_working();

        if let Some(metrics) = metrics.as_deref() {
            metrics.record_run(outcome, clock.elapsed(), spans.len());
        }
        *last_trace = spans;

        info!(
            worker = %worker_name,
            run_id = %run_id,
            success = result.success,
            cost = result.cost,
            outcome = outcome.as_str(),
            "Run finished"
        );

        match fatal {
            Some(err) => Err(err),
            None => Ok(result),
        }
    }

    /// Continue a stored run.
    ///
    /// When its observation asked for follow-up, a new run starts with the
    /// original objective merged with the follow-up context. Otherwise the
    /// stored result is returned without executing anything.
    pub async fn resume(&mut self, run_id: &RunId) -> Result<RunResult, RunError> {
        let episode = self
            .memory
            .recall_episode(run_id)
            .await
            .ok_or_else(|| RunError::EpisodeNotFound(run_id.clone()))?;

        match episode.follow_up() {
            Some(follow_up) => {
                info!(run_id = %run_id, keys = follow_up.len(), "Resuming with follow-up");
                let objective = episode.objective.merge(&follow_up);
                self.run(objective).await
            }
            None => Ok(episode.to_result()),
        }
    }
}

async fn execute<W: Worker + ?Sized>(
    worker: &W,
    objective: &Objective,
    ctx: &mut RunContext<'_>,
    phases: &mut PhaseTracker,
    result: &mut RunResult,
) -> Result<(), PhaseFailure> {
    phases.advance(RunPhase::Think)?;
    let plan = worker
        .think(objective, ctx)
        .await
        .map_err(|error| PhaseFailure::Worker {
            phase: RunPhase::Think,
            error,
        })?;
    ctx.tracer_mut().log_thinking(&plan);
    ctx.flush_primitive_calls();
    result.plan = Some(plan.clone());

    phases.advance(RunPhase::Act)?;
    let output = worker
        .act(&plan, ctx)
        .await
        .map_err(|error| PhaseFailure::Worker {
            phase: RunPhase::Act,
            error,
        })?;
    ctx.tracer_mut().log_action(&output);
    ctx.flush_primitive_calls();
    result.output = output;

    phases.advance(RunPhase::Observe)?;
    let observation = worker
        .observe(&result.output, objective, ctx)
        .await
        .map_err(|error| PhaseFailure::Worker {
            phase: RunPhase::Observe,
            error,
        })?;
    ctx.tracer_mut().log_observation(&observation);
    ctx.flush_primitive_calls();
    result.success = observation.success;
    result.observation = Some(observation);

    phases.advance(RunPhase::Complete)?;
    Ok(())
}

/// Ask the classifier; its own failure degrades to `Skip`
async fn classify(
    classifier: &dyn ErrorClassifier,
    description: &str,
    context: &ErrorContext,
) -> ErrorDecision {
    match classifier.classify(description, context).await {
        Ok(decision) => decision,
        Err(e) => {
            warn!(run_id = %context.run_id, error = %e, "Error classifier failed");
            ErrorDecision::skip(format!("classifier unavailable: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loopwright_core::{
        EpisodeStore, InMemoryStore, Observation, Plan, ServiceError, SpanStatus, SpanStore,
    };
    use loopwright_observability::tracer::{ACT_SPAN, ERROR_SPAN, ROOT_SPAN};
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;

    /// Worker whose behaviour is fixed up front
    #[derive(Default)]
    struct ScriptedWorker {
        fail_in: Option<(RunPhase, &'static str)>,
        unsuccessful: bool,
        follow_up: Option<Map<String, Value>>,
        seen: Mutex<Vec<Objective>>,
    }

    impl ScriptedWorker {
        fn failing(phase: RunPhase, message: &'static str) -> Self {
            Self {
                fail_in: Some((phase, message)),
                ..Self::default()
            }
        }

        fn check(&self, phase: RunPhase) -> Result<(), BoxError> {
            match self.fail_in {
                Some((p, message)) if p == phase => Err(message.into()),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl Worker for ScriptedWorker {
        fn name(&self) -> &str {
            "research"
        }

        async fn think(&self, objective: &Objective, ctx: &mut RunContext<'_>) -> Result<Plan, BoxError> {
            self.seen.lock().unwrap().push(objective.clone());
            ctx.memory_mut().working_mut().set("thinking", true);
            self.check(RunPhase::Think)?;
            Ok(Plan::new(["search", "summarize"], "two steps").with_confidence(0.9))
        }

        async fn act(&self, _plan: &Plan, ctx: &mut RunContext<'_>) -> Result<Value, BoxError> {
            ctx.add_cost(0.25);
            ctx.log_primitive_call("search", &json!({"q": "rust"}), &json!(["hit"]), true);
            self.check(RunPhase::Act)?;
            ctx.add_cost(0.5);
            Ok(json!({"summary": "done"}))
        }

        async fn observe(
            &self,
            _output: &Value,
            _objective: &Objective,
            ctx: &mut RunContext<'_>,
        ) -> Result<Observation, BoxError> {
            self.check(RunPhase::Observe)?;
            ctx.log_event("scored", Map::new());
            let mut observation = if self.unsuccessful {
                Observation::failure("nothing found")
            } else {
                Observation::success("summary written")
            };
            if let Some(context) = &self.follow_up {
                observation = observation.with_follow_up(context.clone());
            }
            Ok(observation)
        }
    }

    struct BrokenClassifier;

    #[async_trait]
    impl ErrorClassifier for BrokenClassifier {
        async fn classify(&self, _: &str, _: &ErrorContext) -> Result<ErrorDecision, ServiceError> {
            Err(ServiceError::Unavailable {
                service: "classifier",
                reason: "offline".into(),
            })
        }
    }

    fn setup(worker: ScriptedWorker) -> (Arc<InMemoryStore>, AgentRunner<ScriptedWorker>) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), AgentRunner::with_store(worker, store))
    }

    fn names(spans: &[Span]) -> Vec<&str> {
        spans.iter().map(|s| s.name.as_str()).collect()
    }

    #[tokio::test]
    async fn successful_run_nests_primitive_calls_under_act() {
        let (store, mut runner) = setup(ScriptedWorker::default());
        let result = runner
            .run(Objective::new().with("topic", "rust"))
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.is_complete());
        assert_eq!(result.cost, 0.75);
        assert_eq!(result.output, json!({"summary": "done"}));
        assert_eq!(store.episode_count().await, 1);

        let spans = runner.last_trace();
        assert_eq!(names(spans), vec![ROOT_SPAN, "think", "act", "search", "observe"]);
        let root = &spans[0];
        assert!(root.is_root());
        assert_eq!(root.status, SpanStatus::Completed);
        let phase_children: Vec<&str> = spans
            .iter()
            .filter(|s| s.parent_id == Some(root.span_id))
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(phase_children, vec!["think", "act", "observe"]);

        let act = spans.iter().find(|s| s.name == ACT_SPAN).unwrap();
        let search = spans.iter().find(|s| s.name == "search").unwrap();
        assert_eq!(search.parent_id, Some(act.span_id));

        assert_eq!(store.spans_for_run(&result.run_id).await.unwrap().len(), spans.len());
        assert!(runner.memory().working().is_empty());
    }

    #[tokio::test]
    async fn unsuccessful_observation_is_not_an_error() {
        let (_, mut runner) = setup(ScriptedWorker {
            unsuccessful: true,
            ..ScriptedWorker::default()
        });
        let result = runner.run(Objective::new()).await.unwrap();
        assert!(!result.success);
        assert!(result.error.is_none());
        assert_eq!(runner.last_trace()[0].status, SpanStatus::Error);
    }

    #[tokio::test]
    async fn skipped_failure_returns_failed_result() {
        let (store, mut runner) = setup(ScriptedWorker::failing(RunPhase::Act, "widget exploded"));
        let result = runner.run(Objective::new().with("topic", "x")).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("widget exploded"));
        assert_eq!(result.recovery.as_ref().unwrap().action, RecoveryAction::Skip);
        assert_eq!(result.cost, 0.25);
        assert!(result.observation.is_none());

        let spans = runner.last_trace();
        assert!(spans.iter().all(|s| !s.is_open()));
        let error_span = spans.iter().find(|s| s.name == ERROR_SPAN).unwrap();
        assert_eq!(error_span.status, SpanStatus::Error);
        assert_eq!(error_span.attributes["error"], json!("widget exploded"));
        assert!(!spans.iter().any(|s| s.name == ACT_SPAN));
        let search = spans.iter().find(|s| s.name == "search").unwrap();
        assert_eq!(search.parent_id, Some(spans[0].span_id));

        let episode = store.get_episode(&result.run_id).await.unwrap().unwrap();
        assert!(!episode.success);
        assert!(runner.memory().working().is_empty());
    }

    #[tokio::test]
    async fn escalation_returns_the_worker_error() {
        let (store, mut runner) =
            setup(ScriptedWorker::failing(RunPhase::Act, "permission denied on bucket"));
        let err = runner.run(Objective::new()).await.unwrap_err();

        match &err {
            RunError::Escalated { phase, source, .. } => {
                assert_eq!(*phase, RunPhase::Act);
                assert_eq!(source.to_string(), "permission denied on bucket");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(runner.last_trace().iter().any(|s| s.name == ERROR_SPAN));
        assert_eq!(runner.last_trace()[0].status, SpanStatus::Error);
        assert_eq!(store.episode_count().await, 1);
    }

    #[tokio::test]
    async fn classifier_failure_degrades_to_skip() {
        let (_, runner) = setup(ScriptedWorker::failing(RunPhase::Think, "permission denied"));
        let mut runner = runner.with_classifier(Arc::new(BrokenClassifier));

        let result = runner.run(Objective::new()).await.unwrap();
        let decision = result.recovery.unwrap();
        assert_eq!(decision.action, RecoveryAction::Skip);
        assert!(decision.reason.contains("offline"));
        assert!(result.plan.is_none());
    }

    #[tokio::test]
    async fn resume_follows_up_or_replays() {
        let mut follow_up = Map::new();
        follow_up.insert("depth".into(), json!("deep"));
        let (store, mut runner) = setup(ScriptedWorker {
            follow_up: Some(follow_up),
            ..ScriptedWorker::default()
        });

        let first = runner
            .run(Objective::new().with("topic", "rust").with("depth", "shallow"))
            .await
            .unwrap();
        let second = runner.resume(&first.run_id).await.unwrap();
        assert_ne!(second.run_id, first.run_id);
        {
            let seen = runner.worker().seen.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[1].get("depth"), Some(&json!("deep")));
            assert_eq!(seen[1].get("topic"), Some(&json!("rust")));
        }

        let (_, mut plain) = setup(ScriptedWorker::default());
        let done = plain.run(Objective::new()).await.unwrap();
        let replayed = plain.resume(&done.run_id).await.unwrap();
        assert_eq!(replayed.run_id, done.run_id);
        assert_eq!(plain.worker().seen.lock().unwrap().len(), 1);

        assert_eq!(store.episode_count().await, 2);
        assert!(matches!(
            plain.resume(&RunId::new()).await,
            Err(RunError::EpisodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn metrics_track_outcomes() {
        let metrics = Arc::new(RuntimeMetrics::new("test").unwrap());
        let (_, runner) = setup(ScriptedWorker::failing(RunPhase::Observe, "odd output"));
        let mut runner = runner.with_metrics(metrics.clone());

        runner.run(Objective::new()).await.unwrap();
        assert_eq!(metrics.runs_total.with_label_values(&["failure"]).get(), 1);
        assert_eq!(metrics.phase_errors_total.with_label_values(&["observe"]).get(), 1);
        assert!(metrics.spans_recorded_total.get() >= 4);
    }
}
