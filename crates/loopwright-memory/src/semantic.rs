use loopwright_core::{Episode, Pattern, PatternQuery};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::AgentMemory;

impl AgentMemory {
    pub async fn store_pattern(&self, pattern: &Pattern) -> bool {
        match self.patterns.insert_pattern(pattern).await {
            Ok(()) => true,
            Err(e) => {
                warn!(worker = %self.worker, pattern_id = %pattern.id, error = %e, "Failed to store pattern");
                false
            }
        }
    }

    /// Patterns of this worker with `confidence >= min_confidence`, strongest
    /// first. With a context, only patterns tagged with it (ignoring case).
    pub async fn recall_patterns(&self, context: Option<&str>, min_confidence: f64) -> Vec<Pattern> {
        let query = PatternQuery::new()
            .for_worker(&self.worker)
            .min_confidence(min_confidence);

        let patterns = match self.patterns.query_patterns(&query).await {
            Ok(patterns) => patterns,
            Err(e) => {
                warn!(worker = %self.worker, error = %e, "Pattern scan failed");
                return Vec::new();
            }
        };

        patterns
            .into_iter()
            // backends are trusted for ordering, not for the threshold
            .filter(|p| p.confidence >= min_confidence)
            .filter(|p| context.is_none_or(|ctx| p.applies_to(ctx)))
            .collect()
    }

    /// Distil patterns from recent episodes through the learner.
    ///
    /// Does nothing until `min_episodes` recent episodes (successful plus
    /// failed, each side capped at `recent_window`) exist. Then the newest
    /// `extraction_sample` episodes of each outcome are analysed one by one,
    /// and candidates reaching `pattern_threshold` are persisted with the
    /// source run as evidence. Returns the patterns that were persisted.
    pub async fn extract_patterns(&self, min_episodes: usize) -> Vec<Pattern> {
        let Some(learner) = self.learner.clone() else {
            debug!(worker = %self.worker, "No pattern learner configured, skipping extraction");
            return Vec::new();
        };

        let successful = self.recall_successful(self.config.recent_window).await;
        let failed = self.recall_failed(self.config.recent_window).await;
        let available = successful.len() + failed.len();
        if available < min_episodes {
            debug!(
                worker = %self.worker,
                available,
                required = min_episodes,
                "Not enough episodes for pattern extraction"
            );
            return Vec::new();
        }

        let sample = self.config.extraction_sample;
        let batch = successful
            .iter()
            .take(sample)
            .chain(failed.iter().take(sample));

        let mut extracted = Vec::new();
        for episode in batch {
            let (inputs, result) = learning_input(episode);
            let candidate = match learner
                .learn(&self.worker, &inputs, &result, episode.success)
                .await
            {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(worker = %self.worker, run_id = %episode.run_id, error = %e, "Pattern learner failed");
                    continue;
                }
            };

            if !candidate.confidence.is_finite()
                || candidate.confidence < self.config.pattern_threshold
            {
                debug!(
                    worker = %self.worker,
                    run_id = %episode.run_id,
                    confidence = candidate.confidence,
                    "Discarding low-confidence pattern"
                );
                continue;
            }

            let pattern = Pattern::from_candidate(candidate, &self.worker, episode.run_id.clone());
            if self.store_pattern(&pattern).await {
                extracted.push(pattern);
            }
        }

        info!(worker = %self.worker, analysed = available.min(sample * 2), extracted = extracted.len(), "Pattern extraction finished");
        extracted
    }
}

fn learning_input(episode: &Episode) -> (Value, Value) {
    let inputs = json!({
        "objective": episode.objective,
        "plan": episode.plan,
    });
    let result = json!({
        "output": episode.output,
        "observation": episode.observation,
        "error": episode.error,
        "cost": episode.cost,
    });
    (inputs, result)
}
