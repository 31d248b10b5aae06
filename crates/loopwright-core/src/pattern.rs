//! Learned patterns (semantic memory).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{PatternId, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Success,
    Failure,
    Optimization,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Success => "success",
            PatternKind::Failure => "failure",
            PatternKind::Optimization => "optimization",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the pattern-learning service proposes for one episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternCandidate {
    pub kind: PatternKind,
    pub description: String,
    pub confidence: f64,
    #[serde(default)]
    pub applicable_contexts: Vec<String>,
    #[serde(default)]
    pub recommendation: String,
}

/// A persisted regularity extracted from one or more episodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub kind: PatternKind,
    pub description: String,
    pub confidence: f64,
    pub evidence: BTreeSet<RunId>,
    pub applicable_contexts: BTreeSet<String>,
    pub recommendation: String,
    pub worker: String,
    pub created_at: DateTime<Utc>,
}

impl Pattern {
    /// Promote a learner candidate, citing the episode it came from.
    pub fn from_candidate(candidate: PatternCandidate, worker: impl Into<String>, evidence: RunId) -> Self {
        Self {
            id: PatternId::new(),
            kind: candidate.kind,
            description: candidate.description,
            confidence: candidate.confidence,
            evidence: BTreeSet::from([evidence]),
            applicable_contexts: candidate.applicable_contexts.into_iter().collect(),
            recommendation: candidate.recommendation,
            worker: worker.into(),
            created_at: Utc::now(),
        }
    }

    /// Case-insensitive membership test against the applicable contexts.
    pub fn applies_to(&self, context: &str) -> bool {
        let wanted = context.to_lowercase();
        self.applicable_contexts
            .iter()
            .any(|tag| tag.to_lowercase() == wanted)
    }
}
