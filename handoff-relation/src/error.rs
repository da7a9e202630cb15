//! Error types for handoff-relation.

use thiserror::Error;

use handoff_core::{BagError, RelationId};

/// Failures of the provider side of the relation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A non-leader unit tried to write application data. The relation
    /// interface supports exactly one active provider.
    #[error("only the leader may publish on relation {relation}; this interface supports scale-1 providers")]
    PermissionDenied { relation: RelationId },

    #[error(transparent)]
    Bag(#[from] BagError),
}

/// Failures of the requirer side of the relation.
#[derive(Debug, Error)]
pub enum RequirerError {
    /// More than one relation is bound to the endpoint.
    #[error("too many relations on endpoint `{endpoint}`: expected at most 1, found {count}")]
    TooManyRelations { endpoint: String, count: usize },

    /// Infrastructure failure while reading relation data.
    #[error(transparent)]
    Bag(#[from] BagError),
}

impl RequirerError {
    pub fn is_too_many_relations(&self) -> bool {
        matches!(self, RequirerError::TooManyRelations { .. })
    }
}
