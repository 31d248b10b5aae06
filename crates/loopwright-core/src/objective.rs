//! Run objectives.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a run must achieve: an opaque, key-ordered mapping supplied by the
/// scheduler and handed unchanged to the worker's think phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Objective(Map<String, Value>);

impl Objective {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// New objective with `other`'s entries layered over this one.
    ///
    /// Keys present in both take `other`'s value.
    pub fn merge(&self, other: &Map<String, Value>) -> Objective {
        let mut merged = self.0.clone();
        for (key, value) in other {
            merged.insert(key.clone(), value.clone());
        }
        Objective(merged)
    }

    /// Every value rendered as text. Strings are taken verbatim (no quotes),
    /// everything else uses its JSON form.
    pub fn value_strings(&self) -> Vec<String> {
        self.0
            .values()
            .map(|value| match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()
    }

    /// Compact JSON rendering used for similarity matching.
    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }
}

impl From<Map<String, Value>> for Objective {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Objective> for Value {
    fn from(objective: Objective) -> Self {
        Value::Object(objective.0)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Objective {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
