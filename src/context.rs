//! Context derivation: turns a session snapshot into [`QueryOptions`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::session::SessionSnapshot;

pub const WORLD_KEY: &str = "world";
pub const SERVER_KEY: &str = "server";

/// Ordered, deduplicated set of context key/value pairs.
///
/// Keys and values are trimmed and lowercased on insertion. Equality and
/// hashing follow the pair set, so insertion order never matters. Cloning is
/// cheap; the pair set is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct QueryOptions {
    pairs: Arc<BTreeSet<(String, String)>>,
}

impl QueryOptions {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> QueryOptionsBuilder {
        QueryOptionsBuilder::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut b = Self::builder();
        for (k, v) in pairs {
            b = b.with(k.as_ref(), v.as_ref());
        }
        b.build()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.pairs
            .contains(&(normalize(key), normalize(value)))
    }

    /// All values stored under `key`, in order.
    pub fn values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        let key = normalize(key);
        self.pairs
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True when every required pair is present in this set.
    pub fn satisfies(&self, required: &BTreeMap<String, String>) -> bool {
        required.iter().all(|(k, v)| self.contains(k, v))
    }

    /// Stable hex digest of the pair set, for diagnostics.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (k, v) in self.pairs.iter() {
            hasher.update(k.as_bytes());
            hasher.update([0u8]);
            hasher.update(v.as_bytes());
            hasher.update([0xffu8]);
        }
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl std::fmt::Display for QueryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, Default)]
pub struct QueryOptionsBuilder {
    pairs: BTreeSet<(String, String)>,
}

impl QueryOptionsBuilder {
    /// Adds a pair. Blank keys or values are skipped.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        let (key, value) = (normalize(key), normalize(value));
        if !key.is_empty() && !value.is_empty() {
            self.pairs.insert((key, value));
        }
        self
    }

    pub fn build(self) -> QueryOptions {
        QueryOptions {
            pairs: Arc::new(self.pairs),
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Derives [`QueryOptions`] from a session snapshot.
///
/// Pure and uncached: the result depends only on the snapshot and on the
/// static contexts configured at construction.
#[derive(Debug, Clone, Default)]
pub struct ContextResolver {
    static_contexts: BTreeMap<String, String>,
}

impl ContextResolver {
    pub fn new(server: &str, static_contexts: BTreeMap<String, String>) -> Self {
        let mut static_contexts = static_contexts;
        static_contexts
            .entry(SERVER_KEY.to_string())
            .or_insert_with(|| server.to_string());
        Self { static_contexts }
    }

    pub fn static_contexts(&self) -> &BTreeMap<String, String> {
        &self.static_contexts
    }

    pub fn resolve(&self, session: &SessionSnapshot) -> QueryOptions {
        let mut b = QueryOptions::builder();
        for (k, v) in &self.static_contexts {
            b = b.with(k, v);
        }
        if let Some(world) = &session.world {
            b = b.with(WORLD_KEY, world.as_str());
        }
        b.build()
    }
}
