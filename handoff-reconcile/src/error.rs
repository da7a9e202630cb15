//! Error types for handoff-reconcile.

use thiserror::Error;

use handoff_core::{BagError, StateError, SupervisorError};
use handoff_relation::{ProviderError, RequirerError};
use handoff_renderer::RenderError;

/// All errors that can arise while handling a lifecycle event.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("render error: {0}")]
    Render(#[from] RenderError),

    /// The supervisor failed for a reason other than being unreachable.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("requirer error: {0}")]
    Requirer(#[from] RequirerError),

    #[error("relation store error: {0}")]
    Bag(#[from] BagError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Serializing services for a plan diff failed.
    #[error("plan YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
