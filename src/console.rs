//! Line-oriented host that drives the cache end to end.
//!
//! Players are simulated: `login`/`world`/`respawn`/`quit` publish lifecycle
//! events through the [`EventPump`], and `check` goes through the same
//! [`SenderBridge`] path a real platform would use.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::bus::InvalidationBus;
use crate::cache::{CacheStats, PermissionDecisionCache};
use crate::command::{Command, HELP};
use crate::context::ContextResolver;
use crate::errors::PermError;
use crate::events::{EventPump, InvalidationEvent, LifecycleDispatcher};
use crate::lifecycle::Lifecycle;
use crate::policy::loader::load_policies;
use crate::policy::{PolicyEngine, PolicyState, SubjectLoader};
use crate::sender::{SenderBridge, SenderPlatform};
use crate::session::{SessionHandle, SessionSnapshot, WorldId};
use crate::settings::Settings;
use crate::subject::{SubjectId, CONSOLE_NAME};

/// Who a console command speaks about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleSource {
    Console,
    Player { id: SubjectId, name: String },
}

/// Messages go to stdout, prefixed with the recipient.
#[derive(Debug, Default)]
pub struct ConsolePlatform;

impl SenderPlatform for ConsolePlatform {
    type Source = ConsoleSource;

    fn unique_id(&self, source: &ConsoleSource) -> SubjectId {
        match source {
            ConsoleSource::Console => SubjectId::CONSOLE,
            ConsoleSource::Player { id, .. } => *id,
        }
    }

    fn name(&self, source: &ConsoleSource) -> String {
        match source {
            ConsoleSource::Console => CONSOLE_NAME.to_string(),
            ConsoleSource::Player { name, .. } => name.clone(),
        }
    }

    fn send_message(&self, source: &ConsoleSource, message: &str) {
        match source {
            ConsoleSource::Console => println!("{message}"),
            ConsoleSource::Player { name, .. } => println!("[-> {name}] {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reply(String),
    Exit,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub online: Vec<SessionSnapshot>,
    pub loaded_subjects: usize,
    pub cache: CacheStats,
}

pub struct ConsoleHost {
    policy_dir: PathBuf,
    engine: Arc<PolicyEngine>,
    bus: Arc<InvalidationBus>,
    cache: Arc<PermissionDecisionCache>,
    pump: EventPump,
    bridge: SenderBridge<ConsolePlatform>,
    lifecycle: Lifecycle,
    next_handle: AtomicU64,
}

impl ConsoleHost {
    /// Wires engine, bus, cache and event lanes. Must be called from within
    /// a tokio runtime; the server starts out stopped.
    pub fn new(settings: &Settings, state: PolicyState) -> Self {
        let engine = Arc::new(PolicyEngine::new(state));
        let bus = InvalidationBus::new();
        let cache = Arc::new(PermissionDecisionCache::new(
            engine.clone(),
            bus.generations(),
        ));
        let bus = Arc::new(bus.with_cache(cache.clone()));

        // The bus must see a login before the loader makes the subject
        // evaluable.
        let dispatcher = LifecycleDispatcher::builder()
            .subscribe(bus.clone())
            .subscribe(Arc::new(SubjectLoader::new(engine.clone())))
            .build();
        let pump = EventPump::spawn(Arc::new(dispatcher), settings.cache.event_lanes);

        let resolver = ContextResolver::new(
            &settings.contexts.server,
            settings.contexts.static_contexts.clone(),
        );
        let bridge = SenderBridge::new(ConsolePlatform, bus.clone(), cache.clone(), resolver);
        let lifecycle = Lifecycle::new(
            cache.clone(),
            settings.cache.housekeeping_cron.clone(),
            settings.cache.max_age(),
        );

        Self {
            policy_dir: settings.policy.dir.clone(),
            engine,
            bus,
            cache,
            pump,
            bridge,
            lifecycle,
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn bus(&self) -> &Arc<InvalidationBus> {
        &self.bus
    }

    pub fn cache(&self) -> &Arc<PermissionDecisionCache> {
        &self.cache
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn bridge(&self) -> &SenderBridge<ConsolePlatform> {
        &self.bridge
    }

    /// Resolves a name typed at the console. Unknown names map to their
    /// offline id so checks against them come back undefined.
    pub fn source(&self, who: &str) -> ConsoleSource {
        match self.bus.lookup_unique_id(who) {
            Some(id) if id.is_console() => ConsoleSource::Console,
            Some(id) => ConsoleSource::Player {
                id,
                name: self.bus.lookup_username(id).unwrap_or_else(|| who.to_string()),
            },
            None => ConsoleSource::Player {
                id: SubjectId::parse_or_offline(who),
                name: who.to_string(),
            },
        }
    }

    fn allocate_handle(&self) -> SessionHandle {
        SessionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Publishes and waits until every listener has seen the event.
    async fn publish(&self, event: InvalidationEvent) -> Result<(), PermError> {
        self.pump.publish(event)?;
        self.pump.flush().await;
        Ok(())
    }

    pub async fn execute(&self, command: Command) -> Result<Outcome, PermError> {
        debug!(?command, "Executing console command");
        let reply = match command {
            Command::Login { name, world } => {
                self.lifecycle.started_at()?;
                let subject = SubjectId::parse_or_offline(&name);
                if subject.is_console() || name.eq_ignore_ascii_case(CONSOLE_NAME) {
                    return Ok(Outcome::Reply("The console cannot log in".to_string()));
                }
                // Names are unique among connected players regardless of case.
                let existing = self
                    .bus
                    .lookup_unique_id(&name)
                    .or_else(|| self.bus.is_online(subject).then_some(subject));
                if let Some(existing) = existing {
                    let shown = self.bus.lookup_username(existing).unwrap_or(name);
                    return Ok(Outcome::Reply(format!("{shown} is already online")));
                }
                let handle = self.allocate_handle();
                self.publish(InvalidationEvent::Login {
                    subject,
                    name: name.clone(),
                    handle,
                    world: world.as_deref().map(WorldId::from),
                })
                .await?;
                format!("{name} logged in ({subject}, handle {handle})")
            }
            Command::World { name, world } => {
                self.lifecycle.started_at()?;
                let Some(snapshot) = self.online(&name) else {
                    return Ok(Outcome::Reply(format!("{name} is not online")));
                };
                self.publish(InvalidationEvent::WorldChange {
                    subject: snapshot.subject,
                    from: snapshot.world,
                    to: WorldId::from(world.as_str()),
                })
                .await?;
                format!("{} moved to {world}", snapshot.name)
            }
            Command::Respawn { name, world, alive } => {
                self.lifecycle.started_at()?;
                let Some(snapshot) = self.online(&name) else {
                    return Ok(Outcome::Reply(format!("{name} is not online")));
                };
                let Some(old_handle) = snapshot.handle else {
                    return Ok(Outcome::Reply(format!("{name} has no live handle")));
                };
                let new_handle = self.allocate_handle();
                self.publish(InvalidationEvent::Respawn {
                    old_handle,
                    new_handle,
                    world: world.as_deref().map(WorldId::from),
                    alive,
                })
                .await?;
                format!("{} respawned ({old_handle} -> {new_handle})", snapshot.name)
            }
            Command::Quit { name } => {
                let Some(snapshot) = self.online(&name) else {
                    return Ok(Outcome::Reply(format!("{name} is not online")));
                };
                self.publish(InvalidationEvent::Disconnect {
                    subject: snapshot.subject,
                })
                .await?;
                format!("{} disconnected", snapshot.name)
            }
            Command::Check { who, node } => {
                let source = self.source(&who);
                let sender = self.bridge.wrap(&source);
                let value = sender.permission_value(&node);
                format!(
                    "{} {} = {} {}",
                    sender.name(),
                    node,
                    value,
                    sender.query_options()
                )
            }
            Command::Contexts { who } => {
                let source = self.source(&who);
                let sender = self.bridge.wrap(&source);
                format!("{} {}", sender.name(), sender.query_options())
            }
            Command::Status => serde_json::to_string_pretty(&self.status())?,
            Command::Sweep => {
                let swept = self.lifecycle.sweep_now()?;
                format!("Swept {swept} cache entries")
            }
            Command::Reload => {
                let refreshed = self.reload()?;
                format!("Reloaded policies, refreshed {refreshed} loaded subjects")
            }
            Command::Start => {
                let started_at = self.lifecycle.start().await?;
                format!("Server running since {started_at}")
            }
            Command::Stop => {
                let kicked = self.stop().await?;
                format!("Server stopped, disconnected {kicked} players")
            }
            Command::Help => HELP.to_string(),
            Command::Exit => return Ok(Outcome::Exit),
        };
        Ok(Outcome::Reply(reply))
    }

    fn online(&self, name: &str) -> Option<SessionSnapshot> {
        let subject = self.bus.lookup_unique_id(name)?;
        if subject.is_console() {
            return None;
        }
        self.bus.snapshot(subject)
    }

    pub fn status(&self) -> Status {
        let online = self
            .bus
            .online_subjects()
            .into_iter()
            .filter_map(|s| self.bus.snapshot(s.id))
            .collect();
        Status {
            running: self.lifecycle.is_running(),
            started_at: self.lifecycle.started_at().ok(),
            online,
            loaded_subjects: self.engine.loaded_count(),
            cache: self.cache.stats(),
        }
    }

    /// Re-reads the policy directory, swaps it into the engine and
    /// invalidates every subject.
    pub fn reload(&self) -> Result<usize, PermError> {
        let state = load_policies(&self.policy_dir)?;
        let refreshed = self.engine.reload(state);
        self.bus.invalidate_all();
        Ok(refreshed)
    }

    /// Disconnects everyone, then stops the lifecycle.
    pub async fn stop(&self) -> Result<usize, PermError> {
        self.lifecycle.started_at()?;
        let online = self.bus.online_subjects();
        for subject in &online {
            self.pump.publish(InvalidationEvent::Disconnect { subject: subject.id })?;
        }
        self.pump.flush().await;
        self.lifecycle.stop().await?;
        Ok(online.len())
    }

    /// Drains pending events and stops the server if it is running.
    pub async fn shutdown(self) -> Result<(), PermError> {
        if self.lifecycle.is_running() {
            self.stop().await?;
        }
        self.pump.shutdown().await;
        info!("Console host shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::loader::compile_policies;
    use crate::policy::parser::parse_kdl_document;
    use std::fs;
    use tempfile::TempDir;

    const POLICY: &str = r#"
group "default" { allow "chat" }
group "flyers" {
    inherit "default"
    allow "fly" world="nether"
    deny "fly"
}
user "P1" { parent "flyers" }
console { allow "*" }
"#;

    fn settings(dir: &TempDir) -> Settings {
        let mut settings = Settings::default();
        settings.policy.dir = dir.path().to_path_buf();
        settings.contexts.server = "lobby".to_string();
        settings
    }

    async fn host(dir: &TempDir) -> ConsoleHost {
        fs::write(dir.path().join("policy.kdl"), POLICY).unwrap();
        let state = load_policies(dir.path()).unwrap();
        let host = ConsoleHost::new(&settings(dir), state);
        host.execute(Command::Start).await.unwrap();
        host
    }

    async fn run(host: &ConsoleHost, line: &str) -> String {
        match host.execute(line.parse().unwrap()).await.unwrap() {
            Outcome::Reply(reply) => reply,
            Outcome::Exit => "<exit>".to_string(),
        }
    }

    #[tokio::test]
    async fn test_login_check_and_world_change() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir).await;

        assert!(run(&host, "login P1 nether").await.contains("logged in"));
        assert_eq!(
            run(&host, "check P1 fly").await,
            "P1 fly = true {server=lobby, world=nether}"
        );
        run(&host, "world P1 overworld").await;
        assert_eq!(
            run(&host, "check p1 fly").await,
            "P1 fly = false {server=lobby, world=overworld}"
        );
        assert_eq!(host.bus().generation(SubjectId::offline("P1")), 1);

        run(&host, "quit P1").await;
        assert!(run(&host, "check P1 fly").await.starts_with("P1 fly = undefined"));
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_rejects_name_differing_only_in_case() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir).await;
        run(&host, "login P1 nether").await;

        assert_eq!(run(&host, "login p1").await, "P1 is already online");
        assert_eq!(run(&host, "login P1").await, "P1 is already online");
        assert_eq!(host.bus().online_count(), 1);
        assert!(!host.bus().is_online(SubjectId::offline("p1")));
        assert_eq!(
            run(&host, "check p1 fly").await,
            "P1 fly = true {server=lobby, world=nether}"
        );
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_respawn_rebinds_and_invalidates() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir).await;
        run(&host, "login P1 nether").await;
        let reply = run(&host, "respawn P1 overworld dead").await;
        assert!(reply.contains("#1 -> #2"), "{reply}");

        let snapshot = host.bus().snapshot(SubjectId::offline("P1")).unwrap();
        assert_eq!(snapshot.handle, Some(SessionHandle(2)));
        assert!(!snapshot.alive);
        assert_eq!(snapshot.world, Some(WorldId::from("overworld")));
        assert_eq!(snapshot.generation, 1);
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_console_checks() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir).await;
        assert_eq!(
            run(&host, "check console anything.goes").await,
            "Console anything.goes = true {server=lobby}"
        );
        assert_eq!(run(&host, "login console").await, "The console cannot log in");
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_player_is_undefined() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir).await;
        assert_eq!(
            run(&host, "check Ghost chat").await,
            "Ghost chat = undefined {server=lobby}"
        );
        assert_eq!(run(&host, "world Ghost nether").await, "Ghost is not online");
        assert!(!host.bus().is_online(SubjectId::offline("Ghost")));
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reload_invalidates_everyone() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir).await;
        run(&host, "login P2 nether").await;
        assert!(run(&host, "check P2 fly").await.contains("= undefined"));

        fs::write(
            dir.path().join("policy.kdl"),
            r#"group "default" { allow "fly" }"#,
        )
        .unwrap();
        assert_eq!(
            run(&host, "reload").await,
            "Reloaded policies, refreshed 1 loaded subjects"
        );
        assert!(run(&host, "check P2 fly").await.contains("= true"));
        assert_eq!(host.bus().generation(SubjectId::offline("P2")), 1);
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_disconnects_and_blocks_events() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir).await;
        run(&host, "login P1").await;
        run(&host, "login P2").await;

        assert_eq!(run(&host, "stop").await, "Server stopped, disconnected 2 players");
        assert_eq!(host.bus().online_count(), 0);
        assert_eq!(host.engine().loaded_count(), 0);
        let err = host.execute("login P1".parse().unwrap()).await.unwrap_err();
        assert!(matches!(err, PermError::NotRunning));
        assert!(matches!(
            host.execute(Command::Sweep).await,
            Err(PermError::NotRunning)
        ));
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_is_json() {
        let dir = TempDir::new().unwrap();
        let host = host(&dir).await;
        run(&host, "login P1 nether").await;
        run(&host, "check P1 fly").await;

        let status: serde_json::Value =
            serde_json::from_str(&run(&host, "status").await).unwrap();
        assert_eq!(status["running"], true);
        assert_eq!(status["online"][0]["name"], "P1");
        assert_eq!(status["online"][0]["world"], "nether");
        assert_eq!(status["loaded_subjects"], 1);
        assert_eq!(status["cache"]["computations"], 1);
        host.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_exit_and_help() {
        let dir = TempDir::new().unwrap();
        let state = compile_policies(vec![parse_kdl_document(POLICY).unwrap()]).unwrap();
        let host = ConsoleHost::new(&settings(&dir), state);
        assert!(run(&host, "help").await.contains("respawn <name>"));
        assert_eq!(run(&host, "exit").await, "<exit>");
        assert!(matches!(
            host.execute(Command::Stop).await,
            Err(PermError::NotRunning)
        ));
        host.shutdown().await.unwrap();
    }
}
