//! Permission decision cache keyed by (subject, QueryOptions).
//!
//! Entries are revalidated on read against the subject's generation rather
//! than evicted when the generation moves. Each key holds at most one slot;
//! the first reader of a fresh slot computes its decisions and every other
//! reader of that slot blocks on the same `OnceLock` until they are ready.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::bus::Generations;
use crate::context::QueryOptions;
use crate::engine::{DecisionMap, PermissionEngine, Tristate};
use crate::subject::SubjectId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject: SubjectId,
    pub query: QueryOptions,
}

impl CacheKey {
    pub fn new(subject: SubjectId, query: QueryOptions) -> Self {
        Self { subject, query }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.subject, self.query.fingerprint())
    }
}

struct CacheEntry {
    generation: u64,
    decisions: OnceLock<Computed>,
}

/// Outcome of the one computation a slot runs. `decisions` is `None` when
/// the subject was unloaded before the engine got to it.
struct Computed {
    at: Instant,
    decisions: Option<Arc<DecisionMap>>,
}

impl CacheEntry {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            decisions: OnceLock::new(),
        }
    }

    /// An in-flight slot has no age yet.
    fn older_than(&self, max_age: Duration) -> bool {
        self.decisions
            .get()
            .is_some_and(|computed| computed.at.elapsed() > max_age)
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
    swept: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub computations: u64,
    pub swept: u64,
}

pub struct PermissionDecisionCache {
    engine: Arc<dyn PermissionEngine>,
    generations: Arc<Generations>,
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    counters: Counters,
}

impl PermissionDecisionCache {
    pub fn new(engine: Arc<dyn PermissionEngine>, generations: Arc<Generations>) -> Self {
        Self {
            engine,
            generations,
            entries: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn get(&self, subject: SubjectId, query: &QueryOptions, node: &str) -> Tristate {
        self.get_all(subject, query)
            .map(|d| d.lookup(node))
            .unwrap_or(Tristate::Undefined)
    }

    /// Decisions for the subject under `query`, or `None` if the engine has
    /// not loaded the subject.
    pub fn get_all(&self, subject: SubjectId, query: &QueryOptions) -> Option<Arc<DecisionMap>> {
        let observed = self.generations.current(subject);
        self.get_all_at(subject, query, observed)
    }

    /// Same as [`Self::get_all`], validating against a generation the caller
    /// read together with the session the query was derived from.
    pub fn get_all_at(
        &self,
        subject: SubjectId,
        query: &QueryOptions,
        observed: u64,
    ) -> Option<Arc<DecisionMap>> {
        if !self.engine.is_subject_loaded(subject) {
            trace!(subject = %subject, "Subject not loaded, decision undefined");
            return None;
        }

        let key = CacheKey::new(subject, query.clone());
        let entry = self.entry_for(key.clone(), observed);

        let computed = entry.decisions.get_or_init(|| {
            self.counters.computations.fetch_add(1, Ordering::Relaxed);
            debug!(
                subject = %subject,
                query = %query,
                generation = entry.generation,
                "Computing permission decisions"
            );
            Computed {
                decisions: self.engine.compute_decisions(subject, query).map(Arc::new),
                at: Instant::now(),
            }
        });

        if computed.decisions.is_none() {
            // Unloaded between the check above and the computation. Drop the
            // slot unless a newer reader already replaced it.
            self.entries
                .remove_if(&key, |_, stored| Arc::ptr_eq(stored, &entry));
            trace!(subject = %subject, "Subject unloaded during computation, decision undefined");
        }
        computed.decisions.clone()
    }

    /// Returns the entry to read for `key`, replacing it when stale. Only the
    /// shard lock for `key` is held, and never while computing.
    fn entry_for(&self, key: CacheKey, observed: u64) -> Arc<CacheEntry> {
        let subject = key.subject;
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let stored = occupied.get().generation;
                if stored == observed {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return occupied.get().clone();
                }
                if stored > observed {
                    // The reader's snapshot predates an entry computed for the same
                    // contexts; that entry is the fresher answer.
                    let current = self.generations.current(subject);
                    assert!(
                        stored <= current,
                        "cache entry generation {stored} is ahead of subject {subject} generation {current}"
                    );
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return occupied.get().clone();
                }
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!(subject = %subject, stored, observed, "Replacing stale cache entry");
                let entry = Arc::new(CacheEntry::new(observed));
                occupied.insert(entry.clone());
                entry
            }
            Entry::Vacant(vacant) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let entry = Arc::new(CacheEntry::new(observed));
                vacant.insert(entry.clone());
                entry
            }
        }
    }

    /// Called after the subject's generation has been advanced. Stale entries
    /// are dropped lazily on their next read or by [`Self::sweep`].
    pub fn invalidate(&self, subject: SubjectId) {
        trace!(
            subject = %subject,
            generation = self.generations.current(subject),
            "Subject invalidated"
        );
    }

    pub fn invalidate_all(&self) {
        debug!(entries = self.entries.len(), "All subjects invalidated");
    }

    /// Removes entries whose computation finished more than `max_age` ago.
    /// Entries still being computed are kept. Returns how many were removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.older_than(max_age);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.counters
            .swept
            .fetch_add(removed as u64, Ordering::Relaxed);
        info!(removed, remaining = self.entries.len(), "Swept permission cache");
        removed
    }

    pub fn contains(&self, subject: SubjectId, query: &QueryOptions) -> bool {
        self.entries
            .contains_key(&CacheKey::new(subject, query.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            computations: self.counters.computations.load(Ordering::Relaxed),
            swept: self.counters.swept.load(Ordering::Relaxed),
        }
    }
}
