//! Trace spans and tree reconstruction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::ids::{RunId, SpanId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Running,
    Completed,
    Error,
}

/// Timestamped note attached to a span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

/// One timed unit of a run's trace, persisted flat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub span_id: SpanId,
    pub name: String,
    pub worker: String,
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<SpanId>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    pub status: SpanStatus,
}

impl Span {
    pub fn open(
        span_id: SpanId,
        name: impl Into<String>,
        worker: impl Into<String>,
        run_id: RunId,
        parent_id: Option<SpanId>,
    ) -> Self {
        Self {
            span_id,
            name: name.into(),
            worker: worker.into(),
            run_id,
            parent_id,
            started_at: Utc::now(),
            ended_at: None,
            attributes: Map::new(),
            events: Vec::new(),
            status: SpanStatus::Running,
        }
    }

    pub fn close(&mut self, status: SpanStatus) {
        self.ended_at = Some(Utc::now());
        self.status = status;
    }

    fn key(&self) -> SpanKey {
        (self.run_id.clone(), self.span_id)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.ended_at.map(|end| end - self.started_at)
    }
}

type SpanKey = (RunId, SpanId);

/// A span with its children, rebuilt from flat records via `parent_id`
#[derive(Debug, Clone, PartialEq)]
pub struct SpanTree {
    pub span: Span,
    pub children: Vec<SpanTree>,
}

impl SpanTree {
    /// Rebuild every tree contained in `spans`.
    ///
    /// Span ids are only unique within a run, so parents are resolved on
    /// `(run_id, span_id)` and spans of several runs yield one tree each.
    /// Children keep their input order. Spans whose parent is missing from
    /// the input are treated as roots.
    pub fn build(spans: Vec<Span>) -> Vec<SpanTree> {
        let known: HashSet<SpanKey> = spans.iter().map(Span::key).collect();
        let mut children: HashMap<SpanKey, Vec<Span>> = HashMap::new();
        let mut roots = Vec::new();

        for span in spans {
            match span.parent_id {
                Some(parent) if parent != span.span_id => {
                    let parent = (span.run_id.clone(), parent);
                    if known.contains(&parent) {
                        children.entry(parent).or_default().push(span);
                    } else {
                        roots.push(span);
                    }
                }
                _ => roots.push(span),
            }
        }

        roots
            .into_iter()
            .map(|root| Self::attach(root, &mut children))
            .collect()
    }

    fn attach(span: Span, children: &mut HashMap<SpanKey, Vec<Span>>) -> SpanTree {
        let kids = children.remove(&span.key()).unwrap_or_default();
        SpanTree {
            children: kids
                .into_iter()
                .map(|child| Self::attach(child, children))
                .collect(),
            span,
        }
    }

    /// Number of spans in this tree, root included
    pub fn span_count(&self) -> usize {
        1 + self.children.iter().map(SpanTree::span_count).sum::<usize>()
    }

    pub fn find(&self, name: &str) -> Option<&SpanTree> {
        if self.span.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }
}
