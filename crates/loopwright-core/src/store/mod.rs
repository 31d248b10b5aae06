//! Persistence interfaces.
//!
//! Every component receives its store at construction time as an
//! `Arc<dyn ...Store>`. Backends only need atomic single-row reads and
//! updates; nothing here requires cross-row transactions.
//!
//! # Example
//!
//! ```rust,ignore
//! use loopwright_core::store::{EpisodeQuery, EpisodeStore, InMemoryStore};
//!
//! let store = InMemoryStore::new();
//! store.insert_episode(&episode).await?;
//!
//! let recent_failures = store
//!     .query_episodes(&EpisodeQuery::new().for_worker("research").failed().with_limit(5))
//!     .await?;
//! ```

mod in_memory;

pub use in_memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::approval::{ApprovalStatus, PendingApproval};
use crate::error::StoreResult;
use crate::ids::{ApprovalId, MessageId, RunId};
use crate::message::{Message, MessageStatus};
use crate::pattern::{Pattern, PatternKind};
use crate::run::Episode;
use crate::span::Span;

// ============================================================================
// Queries
// ============================================================================

/// Filter for episode scans. Results are always most-recent-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl EpisodeQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn successful(mut self) -> Self {
        self.success = Some(true);
        self
    }

    pub fn failed(mut self) -> Self {
        self.success = Some(false);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, episode: &Episode) -> bool {
        if let Some(worker) = &self.worker
            && &episode.worker != worker
        {
            return false;
        }
        if let Some(success) = self.success
            && episode.success != success
        {
            return false;
        }
        true
    }
}

/// Filter for pattern scans. Results are ordered by confidence descending,
/// then newest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<PatternKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl PatternQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn of_kind(mut self, kind: PatternKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn min_confidence(mut self, threshold: f64) -> Self {
        self.min_confidence = Some(threshold);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, pattern: &Pattern) -> bool {
        if let Some(worker) = &self.worker
            && &pattern.worker != worker
        {
            return false;
        }
        if let Some(kind) = self.kind
            && pattern.kind != kind
        {
            return false;
        }
        if let Some(threshold) = self.min_confidence
            && pattern.confidence < threshold
        {
            return false;
        }
        true
    }
}

/// Single-row update applied when a recipient acknowledges a message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageAck {
    pub status: MessageStatus,
    pub processed_at: DateTime<Utc>,
    pub response: Option<Value>,
}

// ============================================================================
// Store traits
// ============================================================================

#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// Append an episode. Fails with `Duplicate` if the run id is taken.
    async fn insert_episode(&self, episode: &Episode) -> StoreResult<()>;

    async fn get_episode(&self, run_id: &RunId) -> StoreResult<Option<Episode>>;

    /// Most-recent-first scan
    async fn query_episodes(&self, query: &EpisodeQuery) -> StoreResult<Vec<Episode>>;
}

#[async_trait]
pub trait PatternStore: Send + Sync {
    async fn insert_pattern(&self, pattern: &Pattern) -> StoreResult<()>;

    async fn query_patterns(&self, query: &PatternQuery) -> StoreResult<Vec<Pattern>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message(&self, message: &Message) -> StoreResult<()>;

    async fn get_message(&self, id: &MessageId) -> StoreResult<Option<Message>>;

    /// Pending messages for `recipient`, priority descending then send order.
    async fn pending_messages(&self, recipient: &str, limit: usize) -> StoreResult<Vec<Message>>;

    /// Returns `false` when no message has this id.
    async fn acknowledge(&self, id: &MessageId, ack: MessageAck) -> StoreResult<bool>;
}

#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert_approval(&self, approval: &PendingApproval) -> StoreResult<()>;

    async fn get_approval(&self, id: &ApprovalId) -> StoreResult<Option<PendingApproval>>;

    /// Overwrite status and resolution. Returns `false` for unknown ids.
    async fn update_approval(&self, approval: &PendingApproval) -> StoreResult<bool>;

    /// Oldest first
    async fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        worker: Option<&str>,
    ) -> StoreResult<Vec<PendingApproval>>;
}

#[async_trait]
pub trait SpanStore: Send + Sync {
    async fn insert_spans(&self, spans: &[Span]) -> StoreResult<()>;

    /// Spans of one run in recording order
    async fn spans_for_run(&self, run_id: &RunId) -> StoreResult<Vec<Span>>;
}

/// Everything the runtime persists.
pub trait Store: EpisodeStore + PatternStore + MessageStore + ApprovalStore + SpanStore {}

impl<T> Store for T where T: EpisodeStore + PatternStore + MessageStore + ApprovalStore + SpanStore {}
