use async_trait::async_trait;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use super::{
    ApprovalStore, EpisodeQuery, EpisodeStore, MessageAck, MessageStore, PatternQuery,
    PatternStore, SpanStore,
};
use crate::approval::{ApprovalStatus, PendingApproval};
use crate::error::{StoreError, StoreResult};
use crate::ids::{ApprovalId, MessageId, RunId};
use crate::message::Message;
use crate::pattern::Pattern;
use crate::run::Episode;
use crate::span::Span;

/// In-process store for tests and single-process deployments.
///
/// Records live in insertion order, which doubles as the tie-break for
/// "most recent" and "send order". [`set_unavailable`](Self::set_unavailable)
/// simulates a backend outage: every call fails with [`StoreError::Backend`]
/// until it is cleared.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    episodes: RwLock<Vec<Episode>>,
    patterns: RwLock<Vec<Pattern>>,
    messages: RwLock<Vec<Message>>,
    approvals: RwLock<Vec<PendingApproval>>,
    spans: RwLock<Vec<Span>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("in-memory store marked unavailable".into()));
        }
        Ok(())
    }

    pub async fn episode_count(&self) -> usize {
        self.episodes.read().await.len()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn approval_count(&self) -> usize {
        self.approvals.read().await.len()
    }

    pub async fn span_count(&self) -> usize {
        self.spans.read().await.len()
    }
}

fn bounded<T>(items: impl Iterator<Item = T>, limit: Option<usize>) -> Vec<T> {
    match limit {
        Some(limit) => items.take(limit).collect(),
        None => items.collect(),
    }
}

#[async_trait]
impl EpisodeStore for InMemoryStore {
    async fn insert_episode(&self, episode: &Episode) -> StoreResult<()> {
        self.check()?;
        let mut episodes = self.episodes.write().await;
        if episodes.iter().any(|e| e.run_id == episode.run_id) {
            return Err(StoreError::duplicate("episode", &episode.run_id));
        }
        episodes.push(episode.clone());
        debug!(run_id = %episode.run_id, worker = %episode.worker, "Stored episode");
        Ok(())
    }

    async fn get_episode(&self, run_id: &RunId) -> StoreResult<Option<Episode>> {
        self.check()?;
        let episodes = self.episodes.read().await;
        Ok(episodes.iter().find(|e| &e.run_id == run_id).cloned())
    }

    async fn query_episodes(&self, query: &EpisodeQuery) -> StoreResult<Vec<Episode>> {
        self.check()?;
        let episodes = self.episodes.read().await;
        Ok(bounded(
            episodes.iter().rev().filter(|e| query.matches(e)).cloned(),
            query.limit,
        ))
    }
}

#[async_trait]
impl PatternStore for InMemoryStore {
    async fn insert_pattern(&self, pattern: &Pattern) -> StoreResult<()> {
        self.check()?;
        let mut patterns = self.patterns.write().await;
        if patterns.iter().any(|p| p.id == pattern.id) {
            return Err(StoreError::duplicate("pattern", &pattern.id));
        }
        patterns.push(pattern.clone());
        Ok(())
    }

    async fn query_patterns(&self, query: &PatternQuery) -> StoreResult<Vec<Pattern>> {
        self.check()?;
        let patterns = self.patterns.read().await;
        // newest first, then a stable sort on confidence keeps that as tie-break
        let mut matched: Vec<Pattern> = patterns
            .iter()
            .rev()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn insert_message(&self, message: &Message) -> StoreResult<()> {
        self.check()?;
        let mut messages = self.messages.write().await;
        if messages.iter().any(|m| m.id == message.id) {
            return Err(StoreError::duplicate("message", &message.id));
        }
        messages.push(message.clone());
        Ok(())
    }

    async fn get_message(&self, id: &MessageId) -> StoreResult<Option<Message>> {
        self.check()?;
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|m| &m.id == id).cloned())
    }

    async fn pending_messages(&self, recipient: &str, limit: usize) -> StoreResult<Vec<Message>> {
        self.check()?;
        let messages = self.messages.read().await;
        let mut pending: Vec<Message> = messages
            .iter()
            .filter(|m| m.to_agent == recipient && m.is_pending())
            .cloned()
            .collect();
        // stable: equal keys keep insertion (send) order
        pending.sort_by_key(|m| (Reverse(m.priority), m.created_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn acknowledge(&self, id: &MessageId, ack: MessageAck) -> StoreResult<bool> {
        self.check()?;
        let mut messages = self.messages.write().await;
        let Some(message) = messages.iter_mut().find(|m| &m.id == id) else {
            return Ok(false);
        };
        message.status = ack.status;
        message.processed_at = Some(ack.processed_at);
        if ack.response.is_some() {
            message.response = ack.response;
        }
        Ok(true)
    }
}

#[async_trait]
impl ApprovalStore for InMemoryStore {
    async fn insert_approval(&self, approval: &PendingApproval) -> StoreResult<()> {
        self.check()?;
        let mut approvals = self.approvals.write().await;
        if approvals.iter().any(|a| a.id == approval.id) {
            return Err(StoreError::duplicate("approval", &approval.id));
        }
        approvals.push(approval.clone());
        Ok(())
    }

    async fn get_approval(&self, id: &ApprovalId) -> StoreResult<Option<PendingApproval>> {
        self.check()?;
        let approvals = self.approvals.read().await;
        Ok(approvals.iter().find(|a| &a.id == id).cloned())
    }

    async fn update_approval(&self, approval: &PendingApproval) -> StoreResult<bool> {
        self.check()?;
        let mut approvals = self.approvals.write().await;
        let Some(stored) = approvals.iter_mut().find(|a| a.id == approval.id) else {
            return Ok(false);
        };
        stored.status = approval.status;
        stored.resolution = approval.resolution.clone();
        Ok(true)
    }

    async fn list_approvals(
        &self,
        status: Option<ApprovalStatus>,
        worker: Option<&str>,
    ) -> StoreResult<Vec<PendingApproval>> {
        self.check()?;
        let approvals = self.approvals.read().await;
        Ok(approvals
            .iter()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .filter(|a| worker.is_none_or(|w| a.worker == w))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SpanStore for InMemoryStore {
    async fn insert_spans(&self, spans: &[Span]) -> StoreResult<()> {
        self.check()?;
        let mut stored = self.spans.write().await;
        stored.extend_from_slice(spans);
        Ok(())
    }

    async fn spans_for_run(&self, run_id: &RunId) -> StoreResult<Vec<Span>> {
        self.check()?;
        let spans = self.spans.read().await;
        Ok(spans.iter().filter(|s| &s.run_id == run_id).cloned().collect())
    }
}
