//! Provider side: publishes this unit's endpoint into the relation bag.
//!
//! Only the leader writes. An offer made before the endpoint is known is
//! reported as [`Offer::Deferred`] so the caller can requeue the event.

use handoff_core::fact::{HOST_KEY, PORT_KEY};
use handoff_core::{
    BagError, ConnectionFact, Leadership, RelationHandle, RelationId, RelationStore,
};

use crate::error::ProviderError;

/// Result of offering the local endpoint on a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// The endpoint is not known yet; retry the event later.
    Deferred,
    /// The fact was written to the local bag.
    Published(ConnectionFact),
    /// The bag already carried this exact fact.
    Unchanged,
    /// The fact was cleared from the bag.
    Retracted,
    /// Not ready and nothing published to clear. Nothing to retry.
    Idle,
}

impl Offer {
    pub fn wrote(&self) -> bool {
        matches!(self, Offer::Published(_) | Offer::Retracted)
    }
}

/// Provider protocol bound to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    endpoint: String,
    host: Option<String>,
    port: Option<u16>,
}

impl Provider {
    pub fn new(endpoint: impl Into<String>, host: Option<String>, port: Option<u16>) -> Self {
        Self {
            endpoint: endpoint.into(),
            host,
            port,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// `true` iff the host is non-empty and the port is positive.
    pub fn ready(&self) -> bool {
        self.fact().is_some()
    }

    /// The complete local endpoint, if known.
    pub fn fact(&self) -> Option<ConnectionFact> {
        let host = self.host.as_deref()?;
        let port = self.port?;
        ConnectionFact::new(host, port).ok()
    }

    /// Handle a new relation: defer until ready, then publish.
    pub fn on_relation_created(
        &self,
        relation: &RelationHandle,
        store: &mut dyn RelationStore,
        leader: &dyn Leadership,
    ) -> Result<Offer, ProviderError> {
        let Some(fact) = self.fact() else {
            tracing::debug!(relation = %relation.id, "endpoint not known yet; deferring offer");
            return Ok(Offer::Deferred);
        };
        self.publish(relation.id, &fact, store, leader)
    }

    /// Write `fact` into the local application bag.
    ///
    /// Non-leaders fail without touching the bag. Publishing the fact the bag
    /// already carries is a no-op.
    pub fn publish(
        &self,
        relation: RelationId,
        fact: &ConnectionFact,
        store: &mut dyn RelationStore,
        leader: &dyn Leadership,
    ) -> Result<Offer, ProviderError> {
        if !leader.is_leader() {
            return Err(ProviderError::PermissionDenied { relation });
        }
        let mut bag = store.read_local(relation)?;
        if fact.is_published_in(&bag) {
            return Ok(Offer::Unchanged);
        }
        bag.extend(fact.to_databag());
        store.write_local(relation, &bag)?;
        tracing::info!(relation = %relation, endpoint = %fact, "published connection fact");
        Ok(Offer::Published(fact.clone()))
    }

    /// Re-offer the current endpoint on every live relation.
    ///
    /// Used after a config change. A provider that is no longer ready clears
    /// the fact instead; non-leaders do nothing.
    pub fn refresh(
        &self,
        store: &mut dyn RelationStore,
        leader: &dyn Leadership,
    ) -> Result<Vec<(RelationId, Offer)>, ProviderError> {
        if !leader.is_leader() {
            return Ok(Vec::new());
        }
        let relations = store.relations(&self.endpoint)?;
        let mut offers = Vec::with_capacity(relations.len());
        for relation in relations {
            let offer = match self.fact() {
                Some(fact) => self.publish(relation.id, &fact, store, leader)?,
                None => {
                    if self.retract(relation.id, store, leader)? {
                        Offer::Retracted
                    } else {
                        Offer::Idle
                    }
                }
            };
            offers.push((relation.id, offer));
        }
        Ok(offers)
    }

    /// Clear the published fact from the local bag. Returns `true` if
    /// anything was removed. A relation that is already gone is not an error.
    pub fn retract(
        &self,
        relation: RelationId,
        store: &mut dyn RelationStore,
        leader: &dyn Leadership,
    ) -> Result<bool, ProviderError> {
        if !leader.is_leader() {
            return Err(ProviderError::PermissionDenied { relation });
        }
        let mut bag = match store.read_local(relation) {
            Ok(bag) => bag,
            Err(BagError::NotFound { .. }) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        let removed = bag.remove(HOST_KEY).is_some() | bag.remove(PORT_KEY).is_some();
        if removed {
            store.write_local(relation, &bag)?;
            tracing::info!(relation = %relation, "retracted connection fact");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_requires_host_and_port() {
        assert!(Provider::new("db", Some("10.0.0.1".into()), Some(70)).ready());
        assert!(!Provider::new("db", None, Some(70)).ready());
        assert!(!Provider::new("db", Some(String::new()), Some(70)).ready());
        assert!(!Provider::new("db", Some("10.0.0.1".into()), Some(0)).ready());
        assert!(!Provider::new("db", Some("10.0.0.1".into()), None).ready());
    }

    #[test]
    fn fact_matches_endpoint() {
        let provider = Provider::new("db", Some("10.0.0.1".into()), Some(70));
        assert_eq!(
            provider.fact(),
            Some(ConnectionFact::new("10.0.0.1", 70).unwrap())
        );
    }
}
