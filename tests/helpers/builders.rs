use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use contextperm::bus::InvalidationBus;
use contextperm::cache::PermissionDecisionCache;
use contextperm::context::ContextResolver;
use contextperm::engine::Tristate;
use contextperm::sender::{SenderBridge, SenderPlatform};
use contextperm::session::{SessionHandle, WorldId};
use contextperm::subject::{SubjectId, CONSOLE_NAME};

use super::engine::{CountingEngine, Rule};

/// Sources are player names; `console` is the console.
#[derive(Debug, Default)]
pub struct NamePlatform {
    pub outbox: Mutex<Vec<String>>,
}

impl SenderPlatform for NamePlatform {
    type Source = String;

    fn unique_id(&self, source: &String) -> SubjectId {
        if source.eq_ignore_ascii_case("console") {
            SubjectId::CONSOLE
        } else {
            SubjectId::offline(source)
        }
    }

    fn name(&self, source: &String) -> String {
        if source.eq_ignore_ascii_case("console") {
            CONSOLE_NAME.to_string()
        } else {
            source.clone()
        }
    }

    fn send_message(&self, source: &String, message: &str) {
        self.outbox
            .lock()
            .unwrap()
            .push(format!("{}: {message}", self.name(source)));
    }
}

pub struct Harness {
    pub engine: Arc<CountingEngine>,
    pub bus: Arc<InvalidationBus>,
    pub cache: Arc<PermissionDecisionCache>,
    pub bridge: SenderBridge<NamePlatform>,
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    pub fn id(name: &str) -> SubjectId {
        SubjectId::offline(name)
    }

    pub fn login(&self, name: &str, handle: u64, world: Option<&str>) {
        self.bus
            .on_login(Self::id(name), name, SessionHandle(handle), world.map(WorldId::from));
    }

    pub fn check(&self, name: &str, node: &str) -> Tristate {
        self.bridge.check_permission(&name.to_string(), node)
    }
}

#[derive(Default)]
pub struct HarnessBuilder {
    rules: Vec<Rule>,
    delay: Option<Duration>,
    server: Option<String>,
}

impl HarnessBuilder {
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn server(mut self, server: &str) -> Self {
        self.server = Some(server.to_string());
        self
    }

    pub fn build(self) -> Harness {
        let mut engine = CountingEngine::new(self.rules);
        if let Some(delay) = self.delay {
            engine = engine.with_delay(delay);
        }
        let engine = Arc::new(engine);

        let bus = InvalidationBus::new();
        let cache = Arc::new(PermissionDecisionCache::new(
            engine.clone(),
            bus.generations(),
        ));
        let bus = Arc::new(bus.with_cache(cache.clone()));
        let resolver = ContextResolver::new(
            self.server.as_deref().unwrap_or("global"),
            BTreeMap::new(),
        );
        let bridge = SenderBridge::new(NamePlatform::default(), bus.clone(), cache.clone(), resolver);

        Harness {
            engine,
            bus,
            cache,
            bridge,
        }
    }
}
