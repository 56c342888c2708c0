use crate::subject::{Subject, SubjectId};
use serde::{Deserialize, Serialize};

/// Opaque handle to a live connection/entity on the host platform.
///
/// A respawn replaces the handle while the subject stays the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub u64);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to a world/dimension, e.g. `nether` or `minecraft:the_end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldId(String);

impl WorldId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorldId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorldId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Live binding of a subject to runtime state. Owned by the session registry.
#[derive(Debug, Clone)]
pub struct Session {
    pub subject: Subject,
    pub handle: SessionHandle,
    pub world: Option<WorldId>,
    pub alive: bool,
}

impl Session {
    pub fn new(subject: Subject, handle: SessionHandle, world: Option<WorldId>) -> Self {
        Self {
            subject,
            handle,
            world,
            alive: true,
        }
    }
}

/// Point-in-time copy of a session, paired with the generation that was
/// current when it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub subject: SubjectId,
    pub name: String,
    pub handle: Option<SessionHandle>,
    pub world: Option<WorldId>,
    pub alive: bool,
    pub generation: u64,
}

impl SessionSnapshot {
    pub(crate) fn of(session: &Session, generation: u64) -> Self {
        Self {
            subject: session.subject.id,
            name: session.subject.name.clone(),
            handle: Some(session.handle),
            world: session.world.clone(),
            alive: session.alive,
            generation,
        }
    }

    /// A snapshot that is not backed by a registry session.
    pub fn detached(subject: SubjectId, name: impl Into<String>, world: Option<WorldId>) -> Self {
        Self {
            subject,
            name: name.into(),
            handle: None,
            world,
            alive: true,
            generation: 0,
        }
    }
}
