use async_trait::async_trait;
use loopwright_core::{Objective, Observation, Plan};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::BoxError;

/// Domain logic driven by [`AgentRunner`](crate::AgentRunner).
///
/// The runner calls the three phases in order for each run and routes any
/// error they return through the error classifier. Workers hold no
/// per-run state of their own; scratch state belongs in the working tier
/// reachable through [`RunContext::memory_mut`].
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable name used for memory scoping, spans and the mailbox
    fn name(&self) -> &str;

    async fn think(&self, objective: &Objective, ctx: &mut RunContext<'_>) -> Result<Plan, BoxError>;

    /// Carry out the plan. The output is opaque to the runtime.
    async fn act(&self, plan: &Plan, ctx: &mut RunContext<'_>) -> Result<Value, BoxError>;

    async fn observe(
        &self,
        output: &Value,
        objective: &Objective,
        ctx: &mut RunContext<'_>,
    ) -> Result<Observation, BoxError>;
}
