use std::path::PathBuf;

use thiserror::Error;

use handoff_core::{AppName, RelationId, UnitName};

/// Error surface for the local host, its file-backed collaborators and the
/// watcher runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("YAML serialization error: {0}")]
    YamlEncode(#[from] serde_yaml::Error),

    #[error("config error: {0}")]
    Config(#[from] handoff_core::ConfigError),

    #[error("state error: {0}")]
    State(#[from] handoff_core::StateError),

    #[error(transparent)]
    Supervisor(#[from] handoff_core::SupervisorError),

    #[error(transparent)]
    Bag(#[from] handoff_core::BagError),

    #[error("render error: {0}")]
    Render(#[from] handoff_renderer::RenderError),

    #[error(transparent)]
    Reconcile(#[from] handoff_reconcile::ReconcileError),

    #[error("unit `{0}` is not initialized; run `handoff init` first")]
    UnitNotFound(UnitName),

    #[error("unit `{0}` already exists")]
    UnitExists(UnitName),

    #[error("application `{0}` has no units")]
    AppNotFound(AppName),

    #[error("relation {0} not found")]
    RelationNotFound(RelationId),

    #[error("cannot relate {provider} to {requirer}: {reason}")]
    InvalidRelation {
        provider: AppName,
        requirer: AppName,
        reason: String,
    },

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon runtime error: {0}")]
    Runtime(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
