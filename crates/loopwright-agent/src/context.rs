//! Per-run handle passed to every worker phase.

use loopwright_core::{HookType, Message, Objective, RunId};
use loopwright_hooks::{HookDecision, HookRegistry, HookRequest};
use loopwright_memory::{AgentMemory, ObjectiveContext};
use loopwright_mesh::Coordinator;
use loopwright_observability::Tracer;
use serde_json::{Map, Value};

/// Primitive call held back until the span of its phase is recorded
#[derive(Debug)]
struct PrimitiveCall {
    name: String,
    inputs: Value,
    output: Value,
    success: bool,
}

pub struct RunContext<'a> {
    run_id: RunId,
    memory: &'a mut AgentMemory,
    tracer: &'a mut Tracer,
    hooks: Option<&'a HookRegistry>,
    coordinator: Option<&'a Coordinator>,
    cost: f64,
    pending_calls: Vec<PrimitiveCall>,
}

impl std::fmt::Debug for RunContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("worker", &self.memory.worker())
            .field("cost", &self.cost)
            .field("pending_calls", &self.pending_calls.len())
            .finish()
    }
}

impl<'a> RunContext<'a> {
    pub fn new(run_id: RunId, memory: &'a mut AgentMemory, tracer: &'a mut Tracer) -> Self {
        Self {
            run_id,
            memory,
            tracer,
            hooks: None,
            coordinator: None,
            cost: 0.0,
            pending_calls: Vec::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Option<&'a HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_coordinator(mut self, coordinator: Option<&'a Coordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn worker(&self) -> &str {
        self.memory.worker()
    }

    pub fn memory(&self) -> &AgentMemory {
        &*self.memory
    }

    pub fn memory_mut(&mut self) -> &mut AgentMemory {
        &mut *self.memory
    }

    /// Similar episodes, confident patterns and working state for `objective`
    pub async fn context_for(&self, objective: &Objective) -> ObjectiveContext {
        self.memory.get_context_for_objective(objective).await
    }

    /// Add spend to the run total. Negative and NaN amounts are ignored.
    pub fn add_cost(&mut self, amount: f64) {
        if amount > 0.0 {
            self.cost += amount;
        }
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Record a capability invocation.
    ///
    /// Phase spans are written once the phase returns, so calls are held
    /// here and attached after the span of the phase they happened in.
    pub fn log_primitive_call(&mut self, name: &str, inputs: &Value, output: &Value, success: bool) {
        self.pending_calls.push(PrimitiveCall {
            name: name.to_string(),
            inputs: inputs.clone(),
            output: output.clone(),
            success,
        });
    }

    pub fn log_event(&mut self, name: impl Into<String>, attributes: Map<String, Value>) {
        self.tracer.log_event(name, attributes);
    }

    /// Request prefilled with this worker and run
    pub fn hook_request(&self, context: Value) -> HookRequest {
        HookRequest::new(self.worker(), context).with_run(self.run_id.clone())
    }

    /// `Continue` when no registry is attached
    pub async fn check_hook(&self, hook_type: HookType, request: HookRequest) -> HookDecision {
        match self.hooks {
            Some(hooks) => hooks.check_hook(hook_type, request).await,
            None => HookDecision::Continue,
        }
    }

    pub fn hooks(&self) -> Option<&'a HookRegistry> {
        self.hooks
    }

    pub fn coordinator(&self) -> Option<&'a Coordinator> {
        self.coordinator
    }

    /// Pending mailbox messages for this worker; empty without a coordinator
    pub async fn inbox(&self, limit: usize) -> Vec<Message> {
        match self.coordinator {
            Some(coordinator) => coordinator.get_pending_messages(self.worker(), limit).await,
            None => Vec::new(),
        }
    }

    pub(crate) fn tracer_mut(&mut self) -> &mut Tracer {
        &mut *self.tracer
    }

    /// Hand held-back primitive calls to the tracer, which nests them under
    /// the latest `act` span or the root.
    pub(crate) fn flush_primitive_calls(&mut self) {
        for call in self.pending_calls.drain(..) {
            self.tracer
                .log_primitive_call(&call.name, &call.inputs, &call.output, call.success);
        }
    }
}
