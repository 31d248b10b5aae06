//! # Loopwright Agent
//!
//! The run loop. Implement [`Worker`] for your domain logic, wrap it in an
//! [`AgentRunner`] together with its [`AgentMemory`](loopwright_memory::AgentMemory),
//! and call [`AgentRunner::run`] with an objective.
//!
//! ```rust,ignore
//! let store = Arc::new(InMemoryStore::new());
//! let mut runner = AgentRunner::with_store(ResearchWorker::new(), store)
//!     .with_classifier(Arc::new(RuleBasedClassifier::default()));
//!
//! let result = runner.run(Objective::new().with("topic", "wasm")).await?;
//! if let Some(observation) = &result.observation && observation.needs_follow_up {
//!     runner.resume(&result.run_id).await?;
//! }
//! ```

pub mod context;
pub mod error;
pub mod run_loop;
pub mod state;
pub mod worker;

pub use context::RunContext;
pub use error::{BoxError, RunError};
pub use run_loop::AgentRunner;
pub use state::PhaseTracker;
pub use worker::Worker;
