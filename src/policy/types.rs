use std::collections::BTreeMap;

use crate::context::QueryOptions;
use crate::subject::SubjectId;

/// A single `allow`/`deny` entry. Every context listed must be present in
/// the query for the node to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGrant {
    pub node: String,
    pub value: bool,
    pub contexts: BTreeMap<String, String>,
}

impl NodeGrant {
    pub fn allow(node: &str) -> Self {
        Self {
            node: node.to_string(),
            value: true,
            contexts: BTreeMap::new(),
        }
    }

    pub fn deny(node: &str) -> Self {
        Self {
            value: false,
            ..Self::allow(node)
        }
    }

    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.contexts.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_contextual(&self) -> bool {
        !self.contexts.is_empty()
    }

    pub fn applies(&self, query: &QueryOptions) -> bool {
        query.satisfies(&self.contexts)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDef {
    pub name: String,
    /// Groups inherited from, in priority order
    pub parents: Vec<String>,
    pub nodes: Vec<NodeGrant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDef {
    pub id: SubjectId,
    /// Name or UUID as written in the policy file
    pub label: String,
    pub parents: Vec<String>,
    pub nodes: Vec<NodeGrant>,
}

impl UserDef {
    /// A user with no data of its own, inheriting `parent` if given.
    pub fn bare(id: SubjectId, parent: Option<&str>) -> Self {
        Self {
            id,
            label: id.to_string(),
            parents: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
            nodes: Vec::new(),
        }
    }
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub groups: Vec<GroupDef>,
    pub users: Vec<UserDef>,
}
