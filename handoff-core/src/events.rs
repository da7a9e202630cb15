//! Lifecycle events and the pending (deferred) event queue.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::RelationId;

/// Monotonic per-unit event identity. Preserved across deferral.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The finite set of lifecycle events a unit reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    /// The workload's process supervisor became reachable.
    SupervisorReady,
    /// Unit configuration changed.
    ConfigChanged,
    RelationCreated { relation: RelationId },
    RelationChanged { relation: RelationId },
    RelationBroken { relation: RelationId },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::SupervisorReady => "supervisor-ready",
            LifecycleEvent::ConfigChanged => "config-changed",
            LifecycleEvent::RelationCreated { .. } => "relation-created",
            LifecycleEvent::RelationChanged { .. } => "relation-changed",
            LifecycleEvent::RelationBroken { .. } => "relation-broken",
        }
    }

    pub fn relation(&self) -> Option<RelationId> {
        match self {
            LifecycleEvent::RelationCreated { relation }
            | LifecycleEvent::RelationChanged { relation }
            | LifecycleEvent::RelationBroken { relation } => Some(*relation),
            LifecycleEvent::SupervisorReady | LifecycleEvent::ConfigChanged => None,
        }
    }

    /// Parse the CLI form: an event name plus an optional relation id.
    pub fn parse(name: &str, relation: Option<RelationId>) -> Option<Self> {
        match (name, relation) {
            ("supervisor-ready", _) => Some(LifecycleEvent::SupervisorReady),
            ("config-changed", _) => Some(LifecycleEvent::ConfigChanged),
            ("relation-created", Some(relation)) => {
                Some(LifecycleEvent::RelationCreated { relation })
            }
            ("relation-changed", Some(relation)) => {
                Some(LifecycleEvent::RelationChanged { relation })
            }
            ("relation-broken", Some(relation)) => Some(LifecycleEvent::RelationBroken { relation }),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.relation() {
            Some(relation) => write!(f, "{}:{}", self.name(), relation),
            None => write!(f, "{}", self.name()),
        }
    }
}

/// A deferred event waiting for replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEvent {
    pub id: EventId,
    pub event: LifecycleEvent,
}

/// Events waiting to be re-dispatched, keyed by event kind and relation.
///
/// Deferring an event that is already queued keeps the earlier entry (and its
/// id), so replay is idempotent no matter how often an event is re-deferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeferredQueue {
    #[serde(default)]
    entries: BTreeMap<EventId, LifecycleEvent>,
}

impl DeferredQueue {
    /// Queue `event` under `id` unless an equal event is already pending.
    /// Returns `false` when the event was already queued.
    pub fn defer(&mut self, id: EventId, event: LifecycleEvent) -> bool {
        if self.entries.values().any(|queued| *queued == event) {
            return false;
        }
        self.entries.insert(id, event);
        true
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove a replayed event.
    pub fn complete(&mut self, id: EventId) -> Option<LifecycleEvent> {
        self.entries.remove(&id)
    }

    /// Drop every pending event that refers to `relation`.
    pub fn forget_relation(&mut self, relation: RelationId) {
        self.entries.retain(|_, event| event.relation() != Some(relation));
    }

    /// Pending events in original dispatch order.
    pub fn pending(&self) -> Vec<PendingEvent> {
        self.entries
            .iter()
            .map(|(id, event)| PendingEvent {
                id: *id,
                event: event.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferring_twice_keeps_original_identity() {
        let mut queue = DeferredQueue::default();
        let event = LifecycleEvent::RelationCreated {
            relation: RelationId(1),
        };
        assert!(queue.defer(EventId(3), event.clone()));
        assert!(!queue.defer(EventId(7), event.clone()));
        assert_eq!(
            queue.pending(),
            vec![PendingEvent {
                id: EventId(3),
                event
            }]
        );
    }

    #[test]
    fn same_kind_on_different_relations_are_distinct() {
        let mut queue = DeferredQueue::default();
        queue.defer(
            EventId(1),
            LifecycleEvent::RelationCreated {
                relation: RelationId(1),
            },
        );
        queue.defer(
            EventId(2),
            LifecycleEvent::RelationCreated {
                relation: RelationId(2),
            },
        );
        assert_eq!(queue.len(), 2);
        queue.forget_relation(RelationId(1));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pending_is_in_id_order() {
        let mut queue = DeferredQueue::default();
        queue.defer(EventId(9), LifecycleEvent::ConfigChanged);
        queue.defer(EventId(2), LifecycleEvent::SupervisorReady);
        let ids: Vec<_> = queue.pending().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![EventId(2), EventId(9)]);
        assert!(queue.complete(EventId(2)).is_some());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn parse_requires_relation_for_relation_events() {
        assert_eq!(
            LifecycleEvent::parse("supervisor-ready", None),
            Some(LifecycleEvent::SupervisorReady)
        );
        assert_eq!(LifecycleEvent::parse("relation-changed", None), None);
        assert_eq!(
            LifecycleEvent::parse("relation-broken", Some(RelationId(4))),
            Some(LifecycleEvent::RelationBroken {
                relation: RelationId(4)
            })
        );
        assert_eq!(LifecycleEvent::parse("bogus", None), None);
    }

    #[test]
    fn queue_json_roundtrip() {
        let mut queue = DeferredQueue::default();
        queue.defer(
            EventId(1),
            LifecycleEvent::RelationChanged {
                relation: RelationId(5),
            },
        );
        let json = serde_json::to_string(&queue).unwrap();
        let back: DeferredQueue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, queue);
    }
}
