use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display name used for the console subject.
pub const CONSOLE_NAME: &str = "Console";

/// Stable identity of a permission holder (a player or the console).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(Uuid);

impl SubjectId {
    /// Well-known id of the console. It never logs in or out.
    pub const CONSOLE: SubjectId = SubjectId(Uuid::nil());

    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for a player known only by name (offline mode).
    pub fn offline(name: &str) -> Self {
        Self(Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            format!("OfflinePlayer:{name}").as_bytes(),
        ))
    }

    /// Parse either a UUID string or a player name.
    pub fn parse_or_offline(s: &str) -> Self {
        match Uuid::parse_str(s) {
            Ok(id) => Self(id),
            Err(_) => Self::offline(s),
        }
    }

    pub fn is_console(&self) -> bool {
        *self == Self::CONSOLE
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SubjectId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// A permission-holding identity plus its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
}

impl Subject {
    pub fn new(id: SubjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn console() -> Self {
        Self::new(SubjectId::CONSOLE, CONSOLE_NAME)
    }
}
