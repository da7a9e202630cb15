//! Requirer side: turns the remote bag into [`Signal::Ready`] or
//! [`Signal::Broken`]. Never writes connection data.

use std::fmt;

use handoff_core::{
    BagError, ConnectionFact, FactError, RelationHandle, RelationId, RelationStore,
};

use crate::error::RequirerError;

/// Why no usable connection is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokenReason {
    /// The remote bag is incomplete or malformed.
    Fact(FactError),
    /// Reading the remote bag timed out.
    Timeout,
    /// The relation was removed.
    Departed,
    /// No relation is bound to the endpoint.
    NotRelated,
}

impl fmt::Display for BrokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokenReason::Fact(err) => write!(f, "{err}"),
            BrokenReason::Timeout => write!(f, "timed out reading relation data"),
            BrokenReason::Departed => write!(f, "relation removed"),
            BrokenReason::NotRelated => write!(f, "not related"),
        }
    }
}

/// Semantic signal raised for the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Ready {
        relation: RelationId,
        fact: ConnectionFact,
    },
    Broken {
        relation: RelationId,
        reason: BrokenReason,
    },
}

impl Signal {
    pub fn relation(&self) -> RelationId {
        match self {
            Signal::Ready { relation, .. } | Signal::Broken { relation, .. } => *relation,
        }
    }

    /// The connection this signal carries, if any.
    pub fn fact(&self) -> Option<&ConnectionFact> {
        match self {
            Signal::Ready { fact, .. } => Some(fact),
            Signal::Broken { .. } => None,
        }
    }
}

/// Requirer protocol bound to one endpoint. At most one relation is supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirer {
    endpoint: String,
}

impl Requirer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The single relation on this endpoint, if any.
    pub fn relation(
        &self,
        store: &dyn RelationStore,
    ) -> Result<Option<RelationHandle>, RequirerError> {
        let mut relations = store.relations(&self.endpoint)?;
        if relations.len() > 1 {
            return Err(RequirerError::TooManyRelations {
                endpoint: self.endpoint.clone(),
                count: relations.len(),
            });
        }
        Ok(relations.pop())
    }

    /// The current connection, or why there is none.
    pub fn connection(
        &self,
        store: &dyn RelationStore,
    ) -> Result<Result<ConnectionFact, BrokenReason>, RequirerError> {
        let Some(relation) = self.relation(store)? else {
            return Ok(Err(BrokenReason::NotRelated));
        };
        match store.read_remote(relation.id) {
            Ok(bag) => Ok(ConnectionFact::from_databag(&bag).map_err(BrokenReason::Fact)),
            Err(BagError::Timeout { .. }) => Ok(Err(BrokenReason::Timeout)),
            Err(err) => Err(err.into()),
        }
    }

    /// `true` when a complete fact is available.
    pub fn ready(&self, store: &dyn RelationStore) -> Result<bool, RequirerError> {
        Ok(self.connection(store)?.is_ok())
    }

    /// Handle remote data changing on `relation`.
    pub fn on_relation_changed(
        &self,
        store: &dyn RelationStore,
        relation: RelationId,
    ) -> Result<Signal, RequirerError> {
        let signal = match self.connection(store)? {
            Ok(fact) => Signal::Ready { relation, fact },
            Err(reason) => {
                tracing::warn!(relation = %relation, %reason, "relation data not usable");
                Signal::Broken { relation, reason }
            }
        };
        Ok(signal)
    }

    /// Handle the relation being removed.
    pub fn on_relation_broken(&self, relation: RelationId) -> Signal {
        Signal::Broken {
            relation,
            reason: BrokenReason::Departed,
        }
    }
}
