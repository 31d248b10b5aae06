//! Per-run span recorder.
//!
//! A [`Tracer`] belongs to one worker and records one run at a time as a flat
//! list of spans. The phase spans (`think`, `act`, `observe`, `error`) are
//! opened and closed in one step because the work they describe has already
//! finished when they are logged. Everything collected is flushed to the
//! [`SpanStore`] when the run ends.

use loopwright_core::{
    ErrorDecision, Objective, Observation, Plan, RunId, RunResult, Span, SpanEvent, SpanId,
    SpanStatus, SpanStore, Summarize,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ROOT_SPAN: &str = "run";
pub const THINK_SPAN: &str = "think";
pub const ACT_SPAN: &str = "act";
pub const OBSERVE_SPAN: &str = "observe";
pub const ERROR_SPAN: &str = "error";

/// Records the span tree of a worker's current run
pub struct Tracer {
    worker: String,
    store: Option<Arc<dyn SpanStore>>,
    run_id: Option<RunId>,
    root: Option<SpanId>,
    next_id: u64,
    spans: Vec<Span>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("worker", &self.worker)
            .field("run_id", &self.run_id)
            .field("spans", &self.spans.len())
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl Tracer {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            store: None,
            run_id: None,
            root: None,
            next_id: 1,
            spans: Vec::new(),
        }
    }

    /// Persist spans to `store` when runs end
    pub fn with_store(mut self, store: Arc<dyn SpanStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn current_run(&self) -> Option<&RunId> {
        self.run_id.as_ref()
    }

    pub fn root_span(&self) -> Option<SpanId> {
        self.root
    }

    /// Spans recorded so far in the current run, in opening order
    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Reset per-run state and open the root span.
    pub fn start_run(&mut self, run_id: RunId, objective: &Objective) -> SpanId {
        if let Some(previous) = &self.run_id {
            warn!(
                worker = %self.worker,
                previous_run = %previous,
                dropped_spans = self.spans.len(),
                "Starting a new run before the previous one ended"
            );
        }

        self.spans.clear();
        self.next_id = 1;
        self.run_id = Some(run_id.clone());

        let id = self.allocate_id();
        let mut root = Span::open(id, ROOT_SPAN, &self.worker, run_id, None);
        root.attributes
            .insert("objective".into(), Value::Object(objective.summarize()));
        self.spans.push(root);
        self.root = Some(id);
        debug!(worker = %self.worker, span_id = id.get(), "Opened root span");
        id
    }

    pub fn log_thinking(&mut self, plan: &Plan) -> Option<SpanId> {
        self.record_phase(THINK_SPAN, plan.summarize(), SpanStatus::Completed)
    }

    pub fn log_action(&mut self, output: &Value) -> Option<SpanId> {
        self.record_phase(ACT_SPAN, output.summarize(), SpanStatus::Completed)
    }

    pub fn log_observation(&mut self, observation: &Observation) -> Option<SpanId> {
        self.record_phase(OBSERVE_SPAN, observation.summarize(), SpanStatus::Completed)
    }

    pub fn log_error(&mut self, error: &str, decision: &ErrorDecision) -> Option<SpanId> {
        let mut attrs = decision.summarize();
        attrs.insert("error".into(), json!(error));
        self.record_phase(ERROR_SPAN, attrs, SpanStatus::Error)
    }

    /// Record one capability invocation, nested under the latest `act` span
    /// (or the root when no action has been logged yet).
    pub fn log_primitive_call(
        &mut self,
        name: &str,
        inputs: &Value,
        output: &Value,
        success: bool,
    ) -> Option<SpanId> {
        let parent = self
            .spans
            .iter()
            .rev()
            .find(|s| s.name == ACT_SPAN)
            .map(|s| s.span_id)
            .or(self.root)?;

        let mut attrs = Map::new();
        attrs.insert("primitive".into(), json!(name));
        attrs.insert("inputs".into(), inputs.clone());
        attrs.insert("output".into(), output.clone());
        attrs.insert("success".into(), json!(success));

        let status = if success {
            SpanStatus::Completed
        } else {
            SpanStatus::Error
        };
        self.record_closed(name, Some(parent), attrs, status)
    }

    /// Append a timestamped note to the most recently opened span.
    pub fn log_event(&mut self, name: impl Into<String>, attributes: Map<String, Value>) {
        let name = name.into();
        match self.spans.last_mut() {
            Some(span) => {
                debug!(span = %span.name, event = %name, "Span event");
                span.events.push(SpanEvent {
                    name,
                    timestamp: chrono::Utc::now(),
                    attributes,
                });
            }
            None => debug!(worker = %self.worker, event = %name, "Event dropped: no active run"),
        }
    }

    /// Close the root span and flush every span of the run.
    ///
    /// Flushing is best-effort: a store failure is logged and the spans are
    /// still returned to the caller.
    pub async fn end_run(&mut self, result: &RunResult) -> Vec<Span> {
        let Some(run_id) = self.run_id.take() else {
            warn!(worker = %self.worker, "end_run called without an active run");
            return Vec::new();
        };

        if let Some(root_id) = self.root.take()
            && let Some(root) = self.spans.iter_mut().find(|s| s.span_id == root_id)
        {
            root.attributes.extend(result.summarize());
            root.close(if result.success {
                SpanStatus::Completed
            } else {
                SpanStatus::Error
            });
            emit(root);
        }

        let spans = std::mem::take(&mut self.spans);
        if let Some(store) = &self.store {
            if let Err(e) = store.insert_spans(&spans).await {
                warn!(
                    worker = %self.worker,
                    run_id = %run_id,
                    spans = spans.len(),
                    error = %e,
                    "Failed to persist spans"
                );
            } else {
                debug!(run_id = %run_id, spans = spans.len(), "Flushed spans");
            }
        }
        spans
    }

    fn allocate_id(&mut self) -> SpanId {
        let id = SpanId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn record_phase(
        &mut self,
        name: &str,
        attributes: Map<String, Value>,
        status: SpanStatus,
    ) -> Option<SpanId> {
        let Some(root) = self.root else {
            warn!(worker = %self.worker, span = name, "Span dropped: no active run");
            return None;
        };
        self.record_closed(name, Some(root), attributes, status)
    }

    fn record_closed(
        &mut self,
        name: &str,
        parent: Option<SpanId>,
        attributes: Map<String, Value>,
        status: SpanStatus,
    ) -> Option<SpanId> {
        let run_id = self.run_id.clone()?;
        let id = self.allocate_id();
        let mut span = Span::open(id, name, &self.worker, run_id, parent);
        span.attributes = attributes;
        span.ended_at = Some(span.started_at);
        span.status = status;
        emit(&span);
        self.spans.push(span);
        Some(id)
    }
}

fn emit(span: &Span) {
    debug!(
        run_id = %span.run_id,
        worker = %span.worker,
        span = %span.name,
        span_id = span.span_id.get(),
        parent_id = ?span.parent_id.map(SpanId::get),
        status = ?span.status,
        "Span closed"
    );
}
