use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::policy::errors::PolicyError;
use crate::policy::parser::parse_kdl_document;
use crate::policy::types::*;
use crate::policy::PolicyState;
use crate::subject::SubjectId;

/// Load all `.kdl` policy files from the given directory and compile them
/// into a single immutable `PolicyState`.
pub fn load_policies(dir: &Path) -> Result<PolicyState, PolicyError> {
    if !dir.is_dir() {
        return Err(PolicyError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    for entry in &entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| PolicyError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        all_parsed.push(parse_kdl_document(&contents)?);
    }

    let state = compile_policies(all_parsed)?;

    tracing::info!(
        files = entries.len(),
        groups = state.groups.len(),
        users = state.users.len(),
        "Loaded permission policies"
    );

    Ok(state)
}

/// Merge parsed files into a `PolicyState`. Later files replace earlier
/// definitions of the same group or user.
pub fn compile_policies(parsed: Vec<ParsedPolicy>) -> Result<PolicyState, PolicyError> {
    let mut groups: HashMap<String, GroupDef> = HashMap::new();
    let mut users: HashMap<SubjectId, UserDef> = HashMap::new();

    for p in parsed {
        for group in p.groups {
            groups.insert(group.name.clone(), group);
        }
        for user in p.users {
            users.insert(user.id, user);
        }
    }

    for group in groups.values() {
        for parent in &group.parents {
            if !groups.contains_key(parent) {
                return Err(PolicyError::UndefinedGroup(format!(
                    "{parent} (inherited by group {})",
                    group.name
                )));
            }
        }
    }
    for user in users.values() {
        for parent in &user.parents {
            if !groups.contains_key(parent) {
                return Err(PolicyError::UndefinedGroup(format!(
                    "{parent} (parent of user {})",
                    user.label
                )));
            }
        }
    }

    check_group_cycles(&groups)?;

    Ok(PolicyState { groups, users })
}

/// Check for cycles in group inheritance using DFS.
fn check_group_cycles(groups: &HashMap<String, GroupDef>) -> Result<(), PolicyError> {
    let mut visited = HashSet::new();
    let mut in_stack = HashSet::new();

    let mut names: Vec<&String> = groups.keys().collect();
    names.sort();
    for name in names {
        if !visited.contains(name.as_str()) {
            dfs_cycle_check(name, groups, &mut visited, &mut in_stack)?;
        }
    }
    Ok(())
}

fn dfs_cycle_check(
    name: &str,
    groups: &HashMap<String, GroupDef>,
    visited: &mut HashSet<String>,
    in_stack: &mut HashSet<String>,
) -> Result<(), PolicyError> {
    visited.insert(name.to_string());
    in_stack.insert(name.to_string());

    if let Some(group) = groups.get(name) {
        for parent in &group.parents {
            if in_stack.contains(parent.as_str()) {
                return Err(PolicyError::CyclicInheritance(format!("{name} -> {parent}")));
            }
            if !visited.contains(parent.as_str()) {
                dfs_cycle_check(parent, groups, visited, in_stack)?;
            }
        }
    }

    in_stack.remove(name);
    Ok(())
}
