//! Entry point for permission checks issued by command sources.
//!
//! A host environment implements [`SenderPlatform`] once for its own source
//! type; [`SenderBridge`] adds context resolution and cached permission
//! checks on top of it.

use std::sync::Arc;

use tracing::trace;

use crate::bus::InvalidationBus;
use crate::cache::PermissionDecisionCache;
use crate::context::{ContextResolver, QueryOptions};
use crate::engine::Tristate;
use crate::session::SessionSnapshot;
use crate::subject::SubjectId;

/// Capabilities a host provides for its command sources.
pub trait SenderPlatform: Send + Sync {
    type Source;

    /// Subject behind the source. Non-player sources map to
    /// [`SubjectId::CONSOLE`].
    fn unique_id(&self, source: &Self::Source) -> SubjectId;

    fn name(&self, source: &Self::Source) -> String;

    fn send_message(&self, source: &Self::Source, message: &str);
}

pub struct SenderBridge<P: SenderPlatform> {
    platform: P,
    bus: Arc<InvalidationBus>,
    cache: Arc<PermissionDecisionCache>,
    resolver: ContextResolver,
}

impl<P: SenderPlatform> SenderBridge<P> {
    pub fn new(
        platform: P,
        bus: Arc<InvalidationBus>,
        cache: Arc<PermissionDecisionCache>,
        resolver: ContextResolver,
    ) -> Self {
        Self {
            platform,
            bus,
            cache,
            resolver,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn resolver(&self) -> &ContextResolver {
        &self.resolver
    }

    pub fn wrap<'a>(&'a self, source: &'a P::Source) -> Sender<'a, P> {
        Sender {
            bridge: self,
            source,
        }
    }

    fn snapshot(&self, source: &P::Source) -> Option<SessionSnapshot> {
        self.bus.snapshot(self.platform.unique_id(source))
    }

    /// Contexts the source's next check would be evaluated under. Sources
    /// without a session get the static contexts only.
    pub fn query_options(&self, source: &P::Source) -> QueryOptions {
        let snapshot = self.snapshot(source).unwrap_or_else(|| {
            let id = self.platform.unique_id(source);
            SessionSnapshot::detached(id, self.platform.name(source), None)
        });
        self.resolver.resolve(&snapshot)
    }

    /// Never blocks on loading. Unknown, disconnected or not-yet-loaded
    /// subjects yield `Undefined`.
    pub fn check_permission(&self, source: &P::Source, node: &str) -> Tristate {
        let Some(snapshot) = self.snapshot(source) else {
            trace!(node, "No session for source, permission undefined");
            return Tristate::Undefined;
        };
        let query = self.resolver.resolve(&snapshot);
        let result = self
            .cache
            .get_all_at(snapshot.subject, &query, snapshot.generation)
            .map(|decisions| decisions.lookup(node))
            .unwrap_or(Tristate::Undefined);
        trace!(
            subject = %snapshot.subject,
            node,
            result = %result,
            generation = snapshot.generation,
            "Permission check"
        );
        result
    }

    pub fn has_permission(&self, source: &P::Source, node: &str) -> bool {
        self.check_permission(source, node).as_bool()
    }
}

/// A command source viewed through its bridge.
pub struct Sender<'a, P: SenderPlatform> {
    bridge: &'a SenderBridge<P>,
    source: &'a P::Source,
}

impl<P: SenderPlatform> Sender<'_, P> {
    pub fn unique_id(&self) -> SubjectId {
        self.bridge.platform.unique_id(self.source)
    }

    pub fn name(&self) -> String {
        self.bridge.platform.name(self.source)
    }

    pub fn is_console(&self) -> bool {
        self.unique_id().is_console()
    }

    pub fn send_message(&self, message: &str) {
        self.bridge.platform.send_message(self.source, message);
    }

    pub fn permission_value(&self, node: &str) -> Tristate {
        self.bridge.check_permission(self.source, node)
    }

    pub fn has_permission(&self, node: &str) -> bool {
        self.bridge.has_permission(self.source, node)
    }

    pub fn query_options(&self) -> QueryOptions {
        self.bridge.query_options(self.source)
    }
}
