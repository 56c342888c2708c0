use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub cache: Cache,
    pub contexts: Contexts,
    pub policy: Policy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Entries older than this are removed by the housekeeping sweep,
    /// whatever their generation.
    pub max_age_secs: u64,
    /// Cron expression (with seconds) for the housekeeping sweep
    pub housekeeping_cron: String,
    /// Number of lanes used to apply lifecycle events
    #[serde(default = "default_event_lanes")]
    pub event_lanes: usize,
}

fn default_event_lanes() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contexts {
    /// Value of the `server` context for every check made on this host
    pub server: String,
    /// Extra contexts added to every check, e.g. `region = "eu"`
    #[serde(default)]
    pub static_contexts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Directory holding `*.kdl` permission files. Default: policies
    pub dir: PathBuf,
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            max_age_secs: 600,
            housekeeping_cron: "0 */2 * * * *".to_string(),
            event_lanes: default_event_lanes(),
        }
    }
}

impl Default for Contexts {
    fn default() -> Self {
        Self {
            server: "global".to_string(),
            static_contexts: BTreeMap::new(),
        }
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("policies"),
        }
    }
}

impl Cache {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("cache.max_age_secs", Cache::default().max_age_secs)
            .into_diagnostic()?
            .set_default("cache.housekeeping_cron", Cache::default().housekeeping_cron)
            .into_diagnostic()?
            .set_default("cache.event_lanes", Cache::default().event_lanes as u64)
            .into_diagnostic()?
            .set_default("contexts.server", Contexts::default().server)
            .into_diagnostic()?
            .set_default(
                "policy.dir",
                Policy::default().dir.to_string_lossy().to_string(),
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: CONTEXTPERM__CACHE__MAX_AGE_SECS=60, etc.
        builder =
            builder.add_source(config::Environment::with_prefix("CONTEXTPERM").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize policy dir to be relative to current dir
        if s.policy.dir.is_relative() {
            s.policy.dir = std::env::current_dir().into_diagnostic()?.join(&s.policy.dir);
        }

        Ok(s)
    }
}
