//! Lifecycle events.
//!
//! Collections and connectors each own an [`EventBus`] with its own listener
//! list, so a listener attached at either level sees the events emitted there.

use crate::{CollectionName, Criteria, Document};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event discriminant, used to subscribe to a single kind of event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BeforeCreate,
    Create,
    Find,
    BeforeUpdate,
    Update,
    BeforeDelete,
    Delete,
    Init,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BeforeCreate => "beforeCreate",
            EventKind::Create => "create",
            EventKind::Find => "find",
            EventKind::BeforeUpdate => "beforeUpdate",
            EventKind::Update => "update",
            EventKind::BeforeDelete => "beforeDelete",
            EventKind::Delete => "delete",
            EventKind::Init => "init",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A validated record is about to be written
    BeforeCreate {
        collection: CollectionName,
        data: Document,
    },
    /// A record was written; carries the persisted shape
    Create {
        collection: CollectionName,
        record: Document,
    },
    Find {
        collection: CollectionName,
        criteria: Criteria,
    },
    BeforeUpdate {
        collection: CollectionName,
        old: Document,
        new: Document,
    },
    Update {
        collection: CollectionName,
        record: Document,
    },
    BeforeDelete {
        collection: CollectionName,
        records: Vec<Document>,
    },
    Delete {
        collection: CollectionName,
        records: Vec<Document>,
    },
    /// The connector's engine finished initializing
    Init,
    /// The connector's engine failed to initialize
    Error { message: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::BeforeCreate { .. } => EventKind::BeforeCreate,
            Event::Create { .. } => EventKind::Create,
            Event::Find { .. } => EventKind::Find,
            Event::BeforeUpdate { .. } => EventKind::BeforeUpdate,
            Event::Update { .. } => EventKind::Update,
            Event::BeforeDelete { .. } => EventKind::BeforeDelete,
            Event::Delete { .. } => EventKind::Delete,
            Event::Init => EventKind::Init,
            Event::Error { .. } => EventKind::Error,
        }
    }

    /// Collection the event concerns, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            Event::BeforeCreate { collection, .. }
            | Event::Create { collection, .. }
            | Event::Find { collection, .. }
            | Event::BeforeUpdate { collection, .. }
            | Event::Update { collection, .. }
            | Event::BeforeDelete { collection, .. }
            | Event::Delete { collection, .. } => Some(collection),
            Event::Init | Event::Error { .. } => None,
        }
    }
}

/// Handle returned by [`EventBus::on`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Synchronous observer registry.
///
/// Listeners run on the emitting task, before `emit` returns. A listener may
/// subscribe or unsubscribe others while running.
#[derive(Default)]
pub struct EventBus {
    listeners: DashMap<u64, (Option<EventKind>, Listener)>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for one kind of event.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(listener))
    }

    /// Listen for every event.
    pub fn on_any<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.listeners.remove(&id.0).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver an event to every matching listener.
    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        // Snapshot first so no shard lock is held while listeners run.
        let mut matching: Vec<(u64, Listener)> = self
            .listeners
            .iter()
            .filter(|entry| entry.value().0.map_or(true, |k| k == kind))
            .map(|entry| (*entry.key(), Arc::clone(&entry.value().1)))
            .collect();
        matching.sort_by_key(|(id, _)| *id);

        tracing::trace!(event = %kind, listeners = matching.len(), "Emitting event");

        for (_, listener) in matching {
            listener(event);
        }
    }

    fn register(&self, kind: Option<EventKind>, listener: Listener) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, (kind, listener));
        ListenerId(id)
    }
}
