//! Lifecycle events and their delivery.
//!
//! Listeners subscribe once while the [`LifecycleDispatcher`] is being built;
//! every published event then reaches every listener in subscription order.
//! [`EventPump`] sits in front of a dispatcher and serialises delivery per
//! subject while letting different subjects proceed in parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::PermError;
use crate::session::{SessionHandle, WorldId};
use crate::subject::SubjectId;

/// Session lifecycle event delivered by the host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
    Login {
        subject: SubjectId,
        name: String,
        handle: SessionHandle,
        world: Option<WorldId>,
    },
    Disconnect {
        subject: SubjectId,
    },
    WorldChange {
        subject: SubjectId,
        from: Option<WorldId>,
        to: WorldId,
    },
    Respawn {
        old_handle: SessionHandle,
        new_handle: SessionHandle,
        world: Option<WorldId>,
        alive: bool,
    },
}

impl InvalidationEvent {
    /// Subject named directly by the event. Respawns only carry handles.
    pub fn subject(&self) -> Option<SubjectId> {
        match self {
            Self::Login { subject, .. }
            | Self::Disconnect { subject }
            | Self::WorldChange { subject, .. } => Some(*subject),
            Self::Respawn { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Disconnect { .. } => "disconnect",
            Self::WorldChange { .. } => "world_change",
            Self::Respawn { .. } => "respawn",
        }
    }
}

pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: &InvalidationEvent);
}

/// Publish/subscribe dispatcher for lifecycle events.
pub struct LifecycleDispatcher {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl LifecycleDispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn publish(&self, event: &InvalidationEvent) {
        debug!(kind = event.kind(), "Publishing lifecycle event");
        for listener in &self.listeners {
            listener.on_event(event);
        }
    }
}

#[derive(Default)]
pub struct DispatcherBuilder {
    listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl DispatcherBuilder {
    pub fn subscribe(mut self, listener: Arc<dyn LifecycleListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build(self) -> LifecycleDispatcher {
        LifecycleDispatcher {
            listeners: self.listeners,
        }
    }
}

enum LaneMessage {
    Event(InvalidationEvent),
    Flush(oneshot::Sender<()>),
}

/// Fans events out over a fixed set of lanes, one tokio task each.
///
/// All events for a subject land on the same lane and are applied in arrival
/// order. Respawns only name handles, so the pump tracks which subject each
/// handle was published for and routes by that.
pub struct EventPump {
    lanes: Vec<mpsc::UnboundedSender<LaneMessage>>,
    workers: Vec<JoinHandle<()>>,
    routes: DashMap<SessionHandle, SubjectId>,
}

impl EventPump {
    /// Must be called from within a tokio runtime.
    pub fn spawn(dispatcher: Arc<LifecycleDispatcher>, lanes: usize) -> Self {
        let lanes = lanes.max(1);
        let mut senders = Vec::with_capacity(lanes);
        let mut workers = Vec::with_capacity(lanes);

        for lane in 0..lanes {
            let (tx, mut rx) = mpsc::unbounded_channel::<LaneMessage>();
            let dispatcher = dispatcher.clone();
            workers.push(tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    match msg {
                        LaneMessage::Event(event) => dispatcher.publish(&event),
                        LaneMessage::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!(lane, "Event lane closed");
            }));
            senders.push(tx);
        }

        Self {
            lanes: senders,
            workers,
            routes: DashMap::new(),
        }
    }

    fn route(&self, event: &InvalidationEvent) -> Option<SubjectId> {
        match event {
            InvalidationEvent::Login {
                subject, handle, ..
            } => {
                self.routes.insert(*handle, *subject);
                Some(*subject)
            }
            InvalidationEvent::Disconnect { subject } => {
                self.routes.retain(|_, s| s != subject);
                Some(*subject)
            }
            InvalidationEvent::WorldChange { subject, .. } => Some(*subject),
            InvalidationEvent::Respawn {
                old_handle,
                new_handle,
                ..
            } => {
                let (_, subject) = self.routes.remove(old_handle)?;
                self.routes.insert(*new_handle, subject);
                Some(subject)
            }
        }
    }

    fn lane_for(&self, event: &InvalidationEvent) -> usize {
        let Some(subject) = self.route(event) else {
            return 0;
        };
        let mut hasher = DefaultHasher::new();
        subject.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }

    pub fn publish(&self, event: InvalidationEvent) -> Result<(), PermError> {
        let lane = self.lane_for(&event);
        self.lanes[lane]
            .send(LaneMessage::Event(event))
            .map_err(|_| PermError::Other("event lane closed".to_string()))
    }

    /// Waits until every event published before this call has been applied.
    pub async fn flush(&self) {
        let mut pending = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            let (tx, rx) = oneshot::channel();
            if lane.send(LaneMessage::Flush(tx)).is_ok() {
                pending.push(rx);
            }
        }
        for rx in pending {
            if rx.await.is_err() {
                warn!("Event lane dropped a flush request");
            }
        }
    }

    /// Closes all lanes and waits for queued events to drain.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InvalidationBus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl LifecycleListener for Recorder {
        fn on_event(&self, event: &InvalidationEvent) {
            self.seen.lock().unwrap().push(event.kind().to_string());
        }
    }

    fn login(name: &str, handle: u64) -> InvalidationEvent {
        InvalidationEvent::Login {
            subject: SubjectId::offline(name),
            name: name.to_string(),
            handle: SessionHandle(handle),
            world: None,
        }
    }

    #[test]
    fn test_dispatcher_delivers_in_subscription_order() {
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let dispatcher = LifecycleDispatcher::builder()
            .subscribe(first.clone())
            .subscribe(second.clone())
            .build();
        assert_eq!(dispatcher.listener_count(), 2);

        dispatcher.publish(&login("P1", 1));
        dispatcher.publish(&InvalidationEvent::Disconnect {
            subject: SubjectId::offline("P1"),
        });

        assert_eq!(*first.seen.lock().unwrap(), vec!["login", "disconnect"]);
        assert_eq!(*second.seen.lock().unwrap(), vec!["login", "disconnect"]);
    }

    #[test]
    fn test_event_subject() {
        assert_eq!(login("P1", 1).subject(), Some(SubjectId::offline("P1")));
        let respawn = InvalidationEvent::Respawn {
            old_handle: SessionHandle(1),
            new_handle: SessionHandle(2),
            world: None,
            alive: false,
        };
        assert_eq!(respawn.subject(), None);
        assert_eq!(respawn.kind(), "respawn");
    }

    #[tokio::test]
    async fn test_pump_applies_events_per_subject_in_order() {
        let bus = Arc::new(InvalidationBus::new());
        let dispatcher = Arc::new(
            LifecycleDispatcher::builder()
                .subscribe(bus.clone())
                .build(),
        );
        let pump = EventPump::spawn(dispatcher, 4);

        let p1 = SubjectId::offline("P1");
        pump.publish(login("P1", 1)).unwrap();
        for world in ["nether", "overworld", "end"] {
            pump.publish(InvalidationEvent::WorldChange {
                subject: p1,
                from: None,
                to: WorldId::from(world),
            })
            .unwrap();
        }
        pump.publish(InvalidationEvent::Respawn {
            old_handle: SessionHandle(1),
            new_handle: SessionHandle(2),
            world: Some(WorldId::from("overworld")),
            alive: false,
        })
        .unwrap();
        pump.flush().await;

        let snapshot = bus.snapshot(p1).unwrap();
        assert_eq!(snapshot.generation, 4);
        assert_eq!(snapshot.handle, Some(SessionHandle(2)));
        assert_eq!(snapshot.world, Some(WorldId::from("overworld")));

        pump.shutdown().await;
    }
}
