use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::context::QueryOptions;
use crate::engine::{DecisionMap, PermissionEngine};
use crate::events::{InvalidationEvent, LifecycleListener};
use crate::policy::types::{NodeGrant, UserDef};
use crate::policy::PolicyState;
use crate::subject::SubjectId;

/// Evaluates compiled policies for the subjects currently loaded.
pub struct PolicyEngine {
    state: RwLock<Arc<PolicyState>>,
    loaded: DashMap<SubjectId, Arc<UserDef>>,
}

impl PolicyEngine {
    pub fn new(state: PolicyState) -> Self {
        Self {
            state: RwLock::new(Arc::new(state)),
            loaded: DashMap::new(),
        }
    }

    pub fn state(&self) -> Arc<PolicyState> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Makes `subject` evaluable. Loading an already loaded subject refreshes
    /// its user data.
    pub fn load_subject(&self, subject: SubjectId) {
        let def = self.state().user_def(subject);
        debug!(%subject, parents = ?def.parents, "Loaded subject");
        self.loaded.insert(subject, Arc::new(def));
    }

    /// Returns false when the subject was not loaded. The console stays
    /// evaluable either way.
    pub fn unload_subject(&self, subject: SubjectId) -> bool {
        let removed = self.loaded.remove(&subject).is_some();
        if removed {
            debug!(%subject, "Unloaded subject");
        }
        removed
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Swaps in a new compiled policy and refreshes every loaded subject.
    /// Callers invalidate cached decisions afterwards.
    pub fn reload(&self, state: PolicyState) -> usize {
        let state = Arc::new(state);
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state.clone();
        for mut entry in self.loaded.iter_mut() {
            let subject = *entry.key();
            *entry.value_mut() = Arc::new(state.user_def(subject));
        }
        let refreshed = self.loaded.len();
        info!(
            groups = state.groups.len(),
            users = state.users.len(),
            refreshed,
            "Reloaded permission policies"
        );
        refreshed
    }

    fn user(&self, subject: SubjectId) -> Option<Arc<UserDef>> {
        match self.loaded.get(&subject) {
            Some(def) => Some(def.clone()),
            None if subject.is_console() => Some(Arc::new(self.state().user_def(subject))),
            None => None,
        }
    }
}

/// Context-specific grants of one holder, then its global grants.
fn apply_holder(map: &mut DecisionMap, nodes: &[NodeGrant], query: &QueryOptions) {
    let contextual = nodes.iter().filter(|g| g.is_contextual());
    let global = nodes.iter().filter(|g| !g.is_contextual());
    for grant in contextual.chain(global) {
        if grant.applies(query) {
            map.insert_if_absent(&grant.node, grant.value);
        }
    }
}

fn apply_group(
    map: &mut DecisionMap,
    state: &PolicyState,
    name: &str,
    query: &QueryOptions,
    visited: &mut HashSet<String>,
) {
    if !visited.insert(name.to_string()) {
        return;
    }
    let Some(group) = state.group(name) else {
        return;
    };
    apply_holder(map, &group.nodes, query);
    for parent in &group.parents {
        apply_group(map, state, parent, query, visited);
    }
}

impl PermissionEngine for PolicyEngine {
    fn is_subject_loaded(&self, subject: SubjectId) -> bool {
        subject.is_console() || self.loaded.contains_key(&subject)
    }

    fn compute_decisions(&self, subject: SubjectId, query: &QueryOptions) -> Option<DecisionMap> {
        let user = self.user(subject)?;
        let state = self.state();
        let mut map = DecisionMap::new();

        apply_holder(&mut map, &user.nodes, query);
        let mut visited = HashSet::new();
        for parent in &user.parents {
            apply_group(&mut map, &state, parent, query, &mut visited);
        }

        debug!(%subject, %query, nodes = map.len(), "Computed decisions");
        Some(map)
    }
}

/// Loads subjects on login and drops them on disconnect.
pub struct SubjectLoader {
    engine: Arc<PolicyEngine>,
}

impl SubjectLoader {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Self { engine }
    }
}

impl LifecycleListener for SubjectLoader {
    fn on_event(&self, event: &InvalidationEvent) {
        match event {
            InvalidationEvent::Login { subject, .. } if !subject.is_console() => {
                self.engine.load_subject(*subject);
            }
            InvalidationEvent::Disconnect { subject } if !subject.is_console() => {
                self.engine.unload_subject(*subject);
            }
            _ => {}
        }
    }
}
