use std::collections::BTreeMap;

use kdl::{KdlDocument, KdlNode};

use crate::policy::errors::PolicyError;
use crate::policy::types::*;
use crate::subject::SubjectId;

/// Parse a KDL document string into typed policy structs.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, PolicyError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| PolicyError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "group" => {
                let name = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidPolicy(
                        "group node requires a string argument (e.g. group \"default\")".into(),
                    )
                })?;
                let (parents, nodes) = parse_holder_body(node, &format!("group `{name}`"))?;
                policy.groups.push(GroupDef {
                    name: name.to_lowercase(),
                    parents,
                    nodes,
                });
            }
            "user" => {
                let label = first_string_arg(node).ok_or_else(|| {
                    PolicyError::InvalidPolicy(
                        "user node requires a UUID or player name (e.g. user \"Notch\")".into(),
                    )
                })?;
                let (parents, nodes) = parse_holder_body(node, &format!("user `{label}`"))?;
                policy.users.push(UserDef {
                    id: SubjectId::parse_or_offline(&label),
                    label,
                    parents,
                    nodes,
                });
            }
            "console" => {
                let (parents, nodes) = parse_holder_body(node, "console")?;
                policy.users.push(UserDef {
                    id: SubjectId::CONSOLE,
                    label: "console".to_string(),
                    parents,
                    nodes,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

/// Children shared by groups and users: `parent`/`inherit`, `allow`, `deny`.
fn parse_holder_body(
    node: &KdlNode,
    owner: &str,
) -> Result<(Vec<String>, Vec<NodeGrant>), PolicyError> {
    let mut parents = Vec::new();
    let mut nodes = Vec::new();

    let Some(children) = node.children() else {
        return Ok((parents, nodes));
    };

    for child in children.nodes() {
        match child.name().value() {
            "parent" | "inherit" => {
                let parent = first_string_arg(child).ok_or_else(|| {
                    PolicyError::InvalidPolicy(format!(
                        "`parent` in {owner} requires a group name (e.g. parent \"default\")"
                    ))
                })?;
                parents.push(parent.to_lowercase());
            }
            verb @ ("allow" | "deny") => {
                nodes.push(parse_grant(child, verb == "allow", owner)?);
            }
            other => {
                return Err(PolicyError::InvalidPolicy(format!(
                    "unexpected child `{other}` in {owner} (expected `parent`, `allow` or `deny`)"
                )));
            }
        }
    }

    Ok((parents, nodes))
}

fn parse_grant(child: &KdlNode, value: bool, owner: &str) -> Result<NodeGrant, PolicyError> {
    let node = first_string_arg(child)
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            PolicyError::InvalidNode(format!("{owner}: allow/deny needs a non-empty node"))
        })?;

    let mut contexts = BTreeMap::new();
    for entry in child.entries() {
        let Some(key) = entry.name() else {
            continue;
        };
        let key = key.value().trim().to_lowercase();
        let ctx_value = entry.value().as_string().ok_or_else(|| {
            PolicyError::InvalidNode(format!(
                "{owner}: context `{key}` on `{node}` must be a string"
            ))
        })?;
        contexts.insert(key, ctx_value.trim().to_lowercase());
    }

    Ok(NodeGrant {
        node,
        value,
        contexts,
    })
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}
