//! Boundary to the Permission Engine that computes decisions from stored data.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::context::QueryOptions;
use crate::subject::SubjectId;

/// Three-valued permission result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tristate {
    True,
    False,
    #[default]
    Undefined,
}

impl Tristate {
    /// `Undefined` counts as not granted.
    pub fn as_bool(self) -> bool {
        matches!(self, Tristate::True)
    }

    pub fn is_defined(self) -> bool {
        !matches!(self, Tristate::Undefined)
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value {
            Tristate::True
        } else {
            Tristate::False
        }
    }
}

impl std::fmt::Display for Tristate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Tristate::True => "true",
            Tristate::False => "false",
            Tristate::Undefined => "undefined",
        })
    }
}

/// Computed decisions for one subject under one set of contexts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionMap {
    nodes: HashMap<String, bool>,
}

impl DecisionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a decision unless the node is already decided.
    pub fn insert_if_absent(&mut self, node: &str, value: bool) {
        self.nodes
            .entry(node.to_lowercase())
            .or_insert(value);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up `node`, falling back to wildcard ancestors:
    /// `a.b.c` → `a.b.*` → `a.*` → `*`.
    pub fn lookup(&self, node: &str) -> Tristate {
        let node = node.trim().to_lowercase();
        if let Some(v) = self.nodes.get(&node) {
            return Tristate::from(*v);
        }

        let mut prefix = node.as_str();
        while let Some((parent, _)) = prefix.rsplit_once('.') {
            if let Some(v) = self.nodes.get(&format!("{parent}.*")) {
                return Tristate::from(*v);
            }
            prefix = parent;
        }

        self.nodes
            .get("*")
            .map(|v| Tristate::from(*v))
            .unwrap_or(Tristate::Undefined)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: AsRef<str>> FromIterator<(S, bool)> for DecisionMap {
    fn from_iter<T: IntoIterator<Item = (S, bool)>>(iter: T) -> Self {
        let mut map = DecisionMap::new();
        for (node, value) in iter {
            map.insert_if_absent(node.as_ref(), value);
        }
        map
    }
}

/// The policy engine consulted on cache misses.
///
/// `compute_decisions` may be expensive; the cache only calls it under
/// single-flight protection and only for subjects reported as loaded.
/// A subject can still be unloaded before the computation runs, so it
/// returns `None` for subjects that are not loaded (as opposed to a loaded
/// subject with no nodes).
pub trait PermissionEngine: Send + Sync {
    fn is_subject_loaded(&self, subject: SubjectId) -> bool;

    fn compute_decisions(&self, subject: SubjectId, query: &QueryOptions) -> Option<DecisionMap>;
}
