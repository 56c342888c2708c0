//! Session registry, per-subject generations and the lifecycle handlers that
//! advance them.
//!
//! Lock order is always `sessions` → `handles` / `generations`. Every
//! mutation of a session and the generation bump that goes with it happen
//! under that session's registry guard, so a [`SessionSnapshot`] (taken under
//! the same guard) never pairs a new world with an old generation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::cache::PermissionDecisionCache;
use crate::events::{InvalidationEvent, LifecycleListener};
use crate::session::{Session, SessionHandle, SessionSnapshot, WorldId};
use crate::subject::{Subject, SubjectId};

/// Per-subject generation counters.
///
/// Shared read-only with the cache; only the bus advances them.
#[derive(Debug, Default)]
pub struct Generations {
    counters: DashMap<SubjectId, AtomicU64>,
}

impl Generations {
    /// Current generation, 0 for subjects never seen.
    pub fn current(&self, subject: SubjectId) -> u64 {
        self.counters
            .get(&subject)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn is_known(&self, subject: SubjectId) -> bool {
        self.counters.contains_key(&subject)
    }

    /// Registers the subject at generation 0. Returns false if already known.
    fn ensure(&self, subject: SubjectId) -> bool {
        match self.counters.entry(subject) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(AtomicU64::new(0));
                true
            }
        }
    }

    fn advance(&self, subject: SubjectId) -> u64 {
        self.counters
            .entry(subject)
            .or_default()
            .fetch_add(1, Ordering::AcqRel)
            + 1
    }

    fn advance_all(&self) -> usize {
        let mut n = 0;
        for counter in self.counters.iter() {
            counter.fetch_add(1, Ordering::AcqRel);
            n += 1;
        }
        n
    }
}

pub struct InvalidationBus {
    sessions: DashMap<SubjectId, Session>,
    handles: DashMap<SessionHandle, SubjectId>,
    generations: Arc<Generations>,
    cache: Option<Arc<PermissionDecisionCache>>,
    console: Subject,
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationBus {
    pub fn new() -> Self {
        let generations = Arc::new(Generations::default());
        generations.ensure(SubjectId::CONSOLE);
        Self {
            sessions: DashMap::new(),
            handles: DashMap::new(),
            generations,
            cache: None,
            console: Subject::console(),
        }
    }

    /// Attaches the cache notified after each applied invalidation.
    /// The cache must have been built over [`Self::generations`].
    pub fn with_cache(mut self, cache: Arc<PermissionDecisionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn generations(&self) -> Arc<Generations> {
        self.generations.clone()
    }

    pub fn generation(&self, subject: SubjectId) -> u64 {
        self.generations.current(subject)
    }

    /// Bumps the generation under the caller's session guard and tells the
    /// cache. The cache never takes registry locks, so holding the guard here
    /// is fine.
    fn invalidate(&self, subject: SubjectId) -> u64 {
        let generation = self.generations.advance(subject);
        if let Some(cache) = &self.cache {
            cache.invalidate(subject);
        }
        generation
    }

    pub fn on_login(
        &self,
        subject: SubjectId,
        name: &str,
        handle: SessionHandle,
        world: Option<WorldId>,
    ) -> Option<u64> {
        if subject.is_console() {
            warn!("Ignoring login event for the console subject");
            return None;
        }

        match self.sessions.entry(subject) {
            Entry::Occupied(_) => {
                debug!(subject = %subject, "Login for subject that already has a session");
                None
            }
            Entry::Vacant(v) => {
                let first_seen = self.generations.ensure(subject);
                v.insert(Session::new(
                    Subject::new(subject, name),
                    handle,
                    world,
                ));
                self.handles.insert(handle, subject);
                let generation = self.generations.current(subject);
                info!(
                    subject = %subject,
                    name,
                    handle = %handle,
                    first_seen,
                    generation,
                    "Session opened"
                );
                Some(generation)
            }
        }
    }

    pub fn on_disconnect(&self, subject: SubjectId) -> Option<u64> {
        if subject.is_console() {
            warn!("Ignoring disconnect event for the console subject");
            return None;
        }

        let Some((_, session)) = self.sessions.remove(&subject) else {
            debug!(subject = %subject, "Disconnect for subject without a session");
            return None;
        };
        self.handles.remove_if(&session.handle, |_, s| *s == subject);
        let generation = self.generations.current(subject);
        info!(subject = %subject, name = %session.subject.name, generation, "Session closed");
        Some(generation)
    }

    pub fn on_world_change(
        &self,
        subject: SubjectId,
        from: Option<&WorldId>,
        to: WorldId,
    ) -> Option<u64> {
        let Some(mut session) = self.sessions.get_mut(&subject) else {
            warn!(subject = %subject, to = %to, "World change for unknown subject, ignoring");
            return None;
        };

        if from.is_some() && session.world.as_ref() != from {
            debug!(
                subject = %subject,
                expected = ?from,
                actual = ?session.world,
                "World change origin does not match session"
            );
        }
        session.world = Some(to);
        let generation = self.invalidate(subject);
        debug!(subject = %subject, world = ?session.world, generation, "World changed");
        Some(generation)
    }

    pub fn on_respawn(
        &self,
        old_handle: SessionHandle,
        new_handle: SessionHandle,
        world: Option<WorldId>,
        alive: bool,
    ) -> Option<u64> {
        let Some(subject) = self.subject_for_handle(old_handle) else {
            warn!(old = %old_handle, new = %new_handle, "Respawn for unknown handle, ignoring");
            return None;
        };

        let Some(mut session) = self.sessions.get_mut(&subject) else {
            warn!(subject = %subject, "Respawn for subject without a session, ignoring");
            return None;
        };
        if session.handle != old_handle {
            debug!(subject = %subject, old = %old_handle, "Respawn handle already rebound");
            return None;
        }

        session.handle = new_handle;
        session.alive = alive;
        if world.is_some() {
            session.world = world;
        }
        self.handles.remove(&old_handle);
        self.handles.insert(new_handle, subject);
        let generation = self.invalidate(subject);
        debug!(
            subject = %subject,
            old = %old_handle,
            new = %new_handle,
            alive,
            generation,
            "Session rebound after respawn"
        );
        Some(generation)
    }

    /// Advances every known subject's generation once, e.g. after the
    /// permission data itself was reloaded.
    pub fn invalidate_all(&self) -> usize {
        let n = self.generations.advance_all();
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
        info!(subjects = n, "Invalidated all subjects");
        n
    }

    pub fn apply(&self, event: &InvalidationEvent) -> Option<u64> {
        match event {
            InvalidationEvent::Login {
                subject,
                name,
                handle,
                world,
            } => self.on_login(*subject, name, *handle, world.clone()),
            InvalidationEvent::Disconnect { subject } => self.on_disconnect(*subject),
            InvalidationEvent::WorldChange { subject, from, to } => {
                self.on_world_change(*subject, from.as_ref(), to.clone())
            }
            InvalidationEvent::Respawn {
                old_handle,
                new_handle,
                world,
                alive,
            } => self.on_respawn(*old_handle, *new_handle, world.clone(), *alive),
        }
    }

    /// Consistent copy of the subject's session and generation.
    ///
    /// The console always has a snapshot; disconnected or unknown subjects
    /// have none.
    pub fn snapshot(&self, subject: SubjectId) -> Option<SessionSnapshot> {
        if subject.is_console() {
            return Some(SessionSnapshot {
                subject,
                name: self.console.name.clone(),
                handle: None,
                world: None,
                alive: true,
                generation: self.generations.current(subject),
            });
        }
        let session = self.sessions.get(&subject)?;
        Some(SessionSnapshot::of(
            &session,
            self.generations.current(subject),
        ))
    }

    pub fn subject_for_handle(&self, handle: SessionHandle) -> Option<SubjectId> {
        self.handles.get(&handle).map(|s| *s)
    }

    pub fn is_online(&self, subject: SubjectId) -> bool {
        self.sessions.contains_key(&subject)
    }

    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn online_subjects(&self) -> Vec<Subject> {
        let mut subjects: Vec<Subject> = self
            .sessions
            .iter()
            .map(|s| s.subject.clone())
            .collect();
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        subjects
    }

    /// Case-insensitive lookup among connected subjects.
    pub fn lookup_unique_id(&self, name: &str) -> Option<SubjectId> {
        if name.eq_ignore_ascii_case(&self.console.name) {
            return Some(SubjectId::CONSOLE);
        }
        self.sessions
            .iter()
            .find(|s| s.subject.name.eq_ignore_ascii_case(name))
            .map(|s| s.subject.id)
    }

    pub fn lookup_username(&self, subject: SubjectId) -> Option<String> {
        if subject.is_console() {
            return Some(self.console.name.clone());
        }
        self.sessions.get(&subject).map(|s| s.subject.name.clone())
    }
}

impl LifecycleListener for InvalidationBus {
    fn on_event(&self, event: &InvalidationEvent) {
        self.apply(event);
    }
}
