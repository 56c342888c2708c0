//! Reference permission engine backed by KDL policy files.

pub mod engine;
pub mod errors;
pub mod loader;
pub mod parser;
pub mod types;

use std::collections::HashMap;

use crate::subject::SubjectId;
use types::{GroupDef, UserDef};

pub use engine::{PolicyEngine, SubjectLoader};

/// Group every subject without an explicit parent inherits, when defined.
pub const DEFAULT_GROUP: &str = "default";

/// Compiled policy. Immutable; a reload swaps in a new state.
#[derive(Debug, Default)]
pub struct PolicyState {
    /// group name -> definition
    pub groups: HashMap<String, GroupDef>,
    pub users: HashMap<SubjectId, UserDef>,
}

impl PolicyState {
    pub fn group(&self, name: &str) -> Option<&GroupDef> {
        self.groups.get(name)
    }

    /// Policy data for `subject`. Users without an entry (and users with no
    /// parents of their own) fall into the default group.
    pub fn user_def(&self, subject: SubjectId) -> UserDef {
        let default = self.groups.contains_key(DEFAULT_GROUP).then_some(DEFAULT_GROUP);
        match self.users.get(&subject) {
            Some(user) if user.parents.is_empty() && !subject.is_console() => UserDef {
                parents: default.map(|d| vec![d.to_string()]).unwrap_or_default(),
                ..user.clone()
            },
            Some(user) => user.clone(),
            None if subject.is_console() => UserDef::bare(subject, None),
            None => UserDef::bare(subject, default),
        }
    }
}
