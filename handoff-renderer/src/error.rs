//! Error types for handoff-renderer.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while computing a workload's desired layer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("tera: {0}")]
    Tera(#[from] tera::Error),

    /// The render context could not be turned into a Tera context.
    #[error("could not build render context: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A rendered layer is not a valid service layer.
    #[error("template `{template}` rendered an invalid layer: {source}")]
    Layer {
        template: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// An override template under `~/.handoff/templates/` could not be read.
    #[error("cannot read template override {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
