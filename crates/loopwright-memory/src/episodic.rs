use loopwright_core::{Episode, EpisodeQuery, Objective, RunId};
use tracing::{debug, warn};

use crate::AgentMemory;

impl AgentMemory {
    /// Persist one run record. Returns `false` if the store rejected it.
    pub async fn store_episode(&self, episode: &Episode) -> bool {
        match self.episodes.insert_episode(episode).await {
            Ok(()) => {
                debug!(worker = %self.worker, run_id = %episode.run_id, success = episode.success, "Stored episode");
                true
            }
            Err(e) => {
                warn!(worker = %self.worker, run_id = %episode.run_id, error = %e, "Failed to store episode");
                false
            }
        }
    }

    pub async fn recall_episode(&self, run_id: &RunId) -> Option<Episode> {
        match self.episodes.get_episode(run_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(worker = %self.worker, run_id = %run_id, error = %e, "Failed to recall episode");
                None
            }
        }
    }

    /// Past episodes of this worker whose objective mentions any value of
    /// `objective`.
    ///
    /// Only the most recent `recent_window` episodes are scanned. A candidate
    /// matches when one of the objective's values, lower-cased, occurs in the
    /// candidate's serialized objective, lower-cased. Most recent first.
    pub async fn recall_similar(&self, objective: &Objective, limit: usize) -> Vec<Episode> {
        let needles: Vec<String> = objective
            .value_strings()
            .into_iter()
            .map(|v| v.to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();
        if needles.is_empty() || limit == 0 {
            return Vec::new();
        }

        let recent = self
            .scan(
                EpisodeQuery::new()
                    .for_worker(&self.worker)
                    .with_limit(self.config.recent_window),
            )
            .await;

        recent
            .into_iter()
            .filter(|candidate| {
                let haystack = candidate.objective.to_json_string().to_lowercase();
                needles.iter().any(|needle| haystack.contains(needle.as_str()))
            })
            .take(limit)
            .collect()
    }

    pub async fn recall_successful(&self, limit: usize) -> Vec<Episode> {
        self.scan(
            EpisodeQuery::new()
                .for_worker(&self.worker)
                .successful()
                .with_limit(limit),
        )
        .await
    }

    pub async fn recall_failed(&self, limit: usize) -> Vec<Episode> {
        self.scan(
            EpisodeQuery::new()
                .for_worker(&self.worker)
                .failed()
                .with_limit(limit),
        )
        .await
    }

    async fn scan(&self, query: EpisodeQuery) -> Vec<Episode> {
        match self.episodes.query_episodes(&query).await {
            Ok(episodes) => episodes,
            Err(e) => {
                warn!(worker = %self.worker, error = %e, "Episode scan failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::AgentMemory;
    use loopwright_core::{Episode, InMemoryStore, Objective, RunId, RunResult};
    use std::sync::Arc;

    fn episode(worker: &str, objective: Objective, success: bool) -> Episode {
        let mut result = RunResult::new(RunId::new(), worker);
        result.success = success;
        Episode::from_result(&result, &objective)
    }

    fn memory() -> (Arc<InMemoryStore>, AgentMemory) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), AgentMemory::with_store("research", store))
    }

    #[tokio::test]
    async fn recall_by_id() {
        let (_, memory) = memory();
        let stored = episode("research", Objective::new().with("topic", "a"), true);
        assert!(memory.store_episode(&stored).await);
        // append-only: second insert of the same run is rejected
        assert!(!memory.store_episode(&stored).await);

        assert_eq!(memory.recall_episode(&stored.run_id).await, Some(stored));
        assert_eq!(memory.recall_episode(&RunId::new()).await, None);
    }

    #[tokio::test]
    async fn similar_is_case_insensitive_and_most_recent_first() {
        let (_, memory) = memory();
        let older = episode("research", Objective::new().with("topic", "WebAssembly runtimes"), true);
        let unrelated = episode("research", Objective::new().with("topic", "databases"), true);
        let newer = episode("research", Objective::new().with("query", "webassembly GC"), false);
        let foreign = episode("content", Objective::new().with("topic", "webassembly"), true);
        for e in [&older, &unrelated, &newer, &foreign] {
            memory.store_episode(e).await;
        }

        let similar = memory
            .recall_similar(&Objective::new().with("topic", "WebAssembly"), 10)
            .await;
        let ids: Vec<_> = similar.iter().map(|e| e.run_id.clone()).collect();
        assert_eq!(ids, vec![newer.run_id.clone(), older.run_id.clone()]);

        let limited = memory
            .recall_similar(&Objective::new().with("topic", "webassembly"), 1)
            .await;
        assert_eq!(limited[0].run_id, newer.run_id);
    }

    #[tokio::test]
    async fn similar_only_scans_recent_window() {
        let store = Arc::new(InMemoryStore::new());
        let config = loopwright_core::MemoryConfig {
            recent_window: 2,
            ..Default::default()
        };
        let memory = AgentMemory::with_store("research", store).with_config(config);

        memory
            .store_episode(&episode("research", Objective::new().with("t", "needle"), true))
            .await;
        for _ in 0..2 {
            memory
                .store_episode(&episode("research", Objective::new().with("t", "hay"), true))
                .await;
        }

        let similar = memory
            .recall_similar(&Objective::new().with("t", "needle"), 5)
            .await;
        assert!(similar.is_empty());
    }

    #[tokio::test]
    async fn outcome_filters_are_bounded() {
        let (_, memory) = memory();
        for success in [true, false, true, true, false] {
            memory
                .store_episode(&episode("research", Objective::new().with("x", 1), success))
                .await;
        }
        assert_eq!(memory.recall_successful(2).await.len(), 2);
        assert_eq!(memory.recall_successful(10).await.len(), 3);
        assert_eq!(memory.recall_failed(10).await.len(), 2);
        assert!(memory.recall_failed(10).await.iter().all(|e| !e.success));
    }

    #[tokio::test]
    async fn store_failures_degrade_quietly() {
        let (store, memory) = memory();
        store.set_unavailable(true);
        let e = episode("research", Objective::new().with("x", 1), true);
        assert!(!memory.store_episode(&e).await);
        assert!(memory.recall_episode(&e.run_id).await.is_none());
        assert!(memory.recall_successful(5).await.is_empty());
    }
}
