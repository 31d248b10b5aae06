//! # Loopwright Memory
//!
//! Three tiers of state a worker can read and write:
//!
//! - **Working**: scratch key/value map for the run in progress, cleared when
//!   the run ends.
//! - **Episodic**: one persisted [`Episode`] per run, recalled by id, by
//!   objective similarity, or by outcome.
//! - **Semantic**: [`Pattern`]s distilled from episodes by an external
//!   [`PatternLearner`].
//!
//! Every persistent operation is best-effort. A store failure is logged at
//! `warn` and the call degrades to an empty, `None` or `false` result instead
//! of failing the caller's run.
//!
//! With the `sqlite` feature this crate also provides [`SqliteStore`], a
//! single-file backend for every persistence trait in `loopwright-core`.

mod episodic;
mod semantic;
pub mod working;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

pub use working::WorkingMemory;

use loopwright_core::{
    Episode, EpisodeStore, MemoryConfig, Objective, Pattern, PatternLearner, PatternStore,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Memory of one worker
pub struct AgentMemory {
    worker: String,
    episodes: Arc<dyn EpisodeStore>,
    patterns: Arc<dyn PatternStore>,
    learner: Option<Arc<dyn PatternLearner>>,
    config: MemoryConfig,
    working: WorkingMemory,
}

impl std::fmt::Debug for AgentMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentMemory")
            .field("worker", &self.worker)
            .field("config", &self.config)
            .field("working_entries", &self.working.len())
            .field("has_learner", &self.learner.is_some())
            .finish()
    }
}

impl AgentMemory {
    pub fn new(
        worker: impl Into<String>,
        episodes: Arc<dyn EpisodeStore>,
        patterns: Arc<dyn PatternStore>,
    ) -> Self {
        Self {
            worker: worker.into(),
            episodes,
            patterns,
            learner: None,
            config: MemoryConfig::default(),
            working: WorkingMemory::new(),
        }
    }

    /// Use one backend for both persistent tiers
    pub fn with_store<S>(worker: impl Into<String>, store: Arc<S>) -> Self
    where
        S: EpisodeStore + PatternStore + 'static,
    {
        let episodes: Arc<dyn EpisodeStore> = store.clone();
        let patterns: Arc<dyn PatternStore> = store;
        Self::new(worker, episodes, patterns)
    }

    pub fn with_learner(mut self, learner: Arc<dyn PatternLearner>) -> Self {
        self.learner = Some(learner);
        self
    }

    pub fn with_config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn working(&self) -> &WorkingMemory {
        &self.working
    }

    pub fn working_mut(&mut self) -> &mut WorkingMemory {
        &mut self.working
    }

    /// Drop all working-tier state. Called when a run ends.
    pub fn clear_working(&mut self) {
        self.working.clear();
    }

    /// Everything a think phase needs about an objective: similar past
    /// episodes, confident patterns and the working-tier snapshot.
    pub async fn get_context_for_objective(&self, objective: &Objective) -> ObjectiveContext {
        let similar_episodes = self
            .recall_similar(objective, self.config.similar_limit)
            .await;
        let mut patterns = self
            .recall_patterns(None, self.config.pattern_threshold)
            .await;
        patterns.truncate(self.config.context_pattern_limit);

        ObjectiveContext {
            objective: objective.clone(),
            similar_episodes,
            patterns,
            working: self.working.snapshot(),
        }
    }
}

/// Context assembled by [`AgentMemory::get_context_for_objective`]
#[derive(Debug, Clone, Serialize)]
pub struct ObjectiveContext {
    pub objective: Objective,
    pub similar_episodes: Vec<Episode>,
    pub patterns: Vec<Pattern>,
    pub working: Map<String, Value>,
}

impl ObjectiveContext {
    pub fn is_empty(&self) -> bool {
        self.similar_episodes.is_empty() && self.patterns.is_empty() && self.working.is_empty()
    }

    /// Recommendations of the attached patterns, strongest first
    pub fn recommendations(&self) -> Vec<&str> {
        self.patterns
            .iter()
            .map(|p| p.recommendation.as_str())
            .filter(|r| !r.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopwright_core::{
        InMemoryStore, PatternCandidate, PatternKind, RunId, RunResult,
    };
    use serde_json::json;

    fn episode(worker: &str, topic: &str) -> Episode {
        let mut result = RunResult::new(RunId::new(), worker);
        result.success = true;
        Episode::from_result(&result, &Objective::new().with("topic", topic))
    }

    #[tokio::test]
    async fn context_combines_all_tiers() {
        let store = Arc::new(InMemoryStore::new());
        let mut memory = AgentMemory::with_store("research", store.clone());

        for topic in ["rust async", "rust macros", "rust errors", "rust traits", "go"] {
            memory.store_episode(&episode("research", topic)).await;
        }
        for confidence in [0.9, 0.5, 0.65, 0.8, 0.7, 0.95, 0.61] {
            let pattern = Pattern::from_candidate(
                PatternCandidate {
                    kind: PatternKind::Success,
                    description: format!("c{confidence}"),
                    confidence,
                    applicable_contexts: vec![],
                    recommendation: format!("do {confidence}"),
                },
                "research",
                RunId::new(),
            );
            memory.store_pattern(&pattern).await;
        }
        memory.working_mut().set("step", 2);

        let context = memory
            .get_context_for_objective(&Objective::new().with("topic", "Rust"))
            .await;

        assert_eq!(context.similar_episodes.len(), 3);
        assert_eq!(context.patterns.len(), 5);
        assert!(context.patterns.iter().all(|p| p.confidence >= 0.6));
        assert_eq!(context.patterns[0].confidence, 0.95);
        assert_eq!(context.working["step"], json!(2));
        assert_eq!(context.recommendations()[0], "do 0.95");
    }

    #[tokio::test]
    async fn context_is_empty_when_store_is_down() {
        let store = Arc::new(InMemoryStore::new());
        let memory = AgentMemory::with_store("research", store.clone());
        store.set_unavailable(true);

        let context = memory
            .get_context_for_objective(&Objective::new().with("topic", "x"))
            .await;
        assert!(context.is_empty());
    }
}
