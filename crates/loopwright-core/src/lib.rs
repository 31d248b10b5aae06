//! # Loopwright Core
//!
//! Shared vocabulary of the Loopwright agent runtime: identifiers, run
//! records, mailbox messages, approvals, spans, the persistence interfaces
//! every component is built on, and the contracts of the external services
//! the runtime consults.
//!
//! Nothing in this crate owns a connection or a global. Components receive a
//! store at construction time; tests hand them an [`InMemoryStore`].

pub mod approval;
pub mod config;
pub mod error;
pub mod ids;
pub mod message;
pub mod objective;
pub mod pattern;
pub mod run;
pub mod services;
pub mod span;
pub mod store;
pub mod summarize;

pub use approval::{ApprovalStatus, HookType, PendingApproval, Resolution};
pub use config::{CoordinatorConfig, HookConfig, HooksConfig, MemoryConfig, RuntimeConfig};
pub use error::{ConfigError, ServiceError, StoreError, StoreResult};
pub use ids::{ApprovalId, IdError, MessageId, PatternId, RunId, SpanId};
pub use message::{Message, MessageRecord, MessageStatus, MessageType, Priority};
pub use objective::Objective;
pub use pattern::{Pattern, PatternCandidate, PatternKind};
pub use run::{Episode, Observation, Plan, RunPhase, RunResult};
pub use services::{
    ErrorClassifier, ErrorContext, ErrorDecision, PatternLearner, RecoveryAction,
    RuleBasedClassifier,
};
pub use span::{Span, SpanEvent, SpanStatus, SpanTree};
pub use store::{
    ApprovalStore, EpisodeQuery, EpisodeStore, InMemoryStore, MessageAck, MessageStore,
    PatternQuery, PatternStore, SpanStore, Store,
};
pub use summarize::Summarize;
