//! # Loopwright
//!
//! Agent execution runtime. Workers run a think → act → observe cycle,
//! remember what happened across runs, hand work to each other through a
//! persisted mailbox, pause for human approval, and leave a span tree of
//! every run behind.
//!
//! | Crate | Provides |
//! |-------|----------|
//! | [`core`] | data model, persistence traits, configuration |
//! | [`observability`] | [`Tracer`](observability::Tracer), metrics, log setup |
//! | [`memory`] | working, episodic and semantic memory |
//! | [`mesh`] | [`Coordinator`](mesh::Coordinator) mailbox |
//! | [`hooks`] | [`HookRegistry`](hooks::HookRegistry) approvals |
//! | [`agent`] | [`Worker`](agent::Worker) and [`AgentRunner`](agent::AgentRunner) |
//!
//! Most programs only need the [`prelude`].

pub use loopwright_agent as agent;
pub use loopwright_core as core;
pub use loopwright_hooks as hooks;
pub use loopwright_memory as memory;
pub use loopwright_mesh as mesh;
pub use loopwright_observability as observability;

pub mod prelude {
    pub use loopwright_agent::{AgentRunner, BoxError, RunContext, RunError, Worker};
    pub use loopwright_core::{
        ErrorClassifier, ErrorDecision, HookType, InMemoryStore, Message, MessageType, Objective,
        Observation, PatternLearner, Plan, Priority, RuleBasedClassifier, RunId, RunPhase,
        RunResult, RuntimeConfig,
    };
    pub use loopwright_hooks::{HookDecision, HookRegistry, HookRequest};
    pub use loopwright_memory::AgentMemory;
    pub use loopwright_mesh::Coordinator;
    pub use loopwright_observability::Tracer;

    #[cfg(feature = "sqlite")]
    pub use loopwright_memory::SqliteStore;
}
