use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use contextperm::context::QueryOptions;
use contextperm::engine::{DecisionMap, PermissionEngine};
use contextperm::subject::SubjectId;

/// A node decision, optionally restricted to one context pair.
#[derive(Debug, Clone)]
pub struct Rule {
    pub node: &'static str,
    pub value: bool,
    pub context: Option<(&'static str, &'static str)>,
}

impl Rule {
    pub fn global(node: &'static str, value: bool) -> Self {
        Self {
            node,
            value,
            context: None,
        }
    }

    pub fn when(node: &'static str, value: bool, key: &'static str, val: &'static str) -> Self {
        Self {
            node,
            value,
            context: Some((key, val)),
        }
    }
}

/// Engine that counts computations and can be slowed down.
#[derive(Debug, Default)]
pub struct CountingEngine {
    rules: Vec<Rule>,
    loaded: Mutex<HashSet<SubjectId>>,
    computations: AtomicUsize,
    delay: Option<Duration>,
    seen: Mutex<Vec<QueryOptions>>,
}

impl CountingEngine {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn load(&self, subject: SubjectId) {
        self.loaded.lock().unwrap().insert(subject);
    }

    pub fn unload(&self, subject: SubjectId) {
        self.loaded.lock().unwrap().remove(&subject);
    }

    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }

    /// Query options passed to each computation, in order.
    pub fn seen(&self) -> Vec<QueryOptions> {
        self.seen.lock().unwrap().clone()
    }
}

impl PermissionEngine for CountingEngine {
    fn is_subject_loaded(&self, subject: SubjectId) -> bool {
        subject.is_console() || self.loaded.lock().unwrap().contains(&subject)
    }

    fn compute_decisions(&self, subject: SubjectId, query: &QueryOptions) -> Option<DecisionMap> {
        self.computations.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(query.clone());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if !self.is_subject_loaded(subject) {
            return None;
        }

        let mut map = DecisionMap::new();
        // Contextual rules first so they win over globals.
        for rule in self.rules.iter().filter(|r| r.context.is_some()) {
            if let Some((k, v)) = rule.context {
                if query.contains(k, v) {
                    map.insert_if_absent(rule.node, rule.value);
                }
            }
        }
        for rule in self.rules.iter().filter(|r| r.context.is_none()) {
            map.insert_if_absent(rule.node, rule.value);
        }
        Some(map)
    }
}
