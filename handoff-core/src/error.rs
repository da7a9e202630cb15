//! Error types for handoff-core.

use std::num::ParseIntError;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::RelationId;

/// Why a relation bag could not be turned into a [`ConnectionFact`].
///
/// [`ConnectionFact`]: crate::fact::ConnectionFact
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactError {
    /// A required key is absent from the bag.
    #[error("relation data is missing `{0}`")]
    MissingKey(&'static str),

    /// The `port` value is not a decimal integer.
    #[error("port `{value}` is not an integer: {source}")]
    MalformedPort {
        value: String,
        #[source]
        source: ParseIntError,
    },

    /// The `port` value parsed but is not a usable TCP port.
    #[error("port {0} is outside 1-65535")]
    PortOutOfRange(i64),

    /// The `host` value is present but empty.
    #[error("host is empty")]
    EmptyHost,
}

/// Failures reported by a workload's process supervisor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The supervisor could not be reached. Recoverable: the caller waits.
    #[error("supervisor unreachable: {reason}")]
    Unreachable { reason: String },

    /// A setup command exited non-zero.
    #[error("command `{command}` exited with status {code}")]
    ExecFailed { command: String, code: i32 },

    /// The supervisor refused a request (unknown service, bad layer, ...).
    #[error("supervisor rejected request: {0}")]
    Rejected(String),

    /// Backing storage failure, with annotated path for context.
    #[error("supervisor I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON encode/decode failure of persisted supervisor state.
    #[error("supervisor state JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SupervisorError {
    /// `true` when the failure only means "not reachable yet".
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SupervisorError::Unreachable { .. })
    }
}

/// Failures reported by the shared relation data store.
#[derive(Debug, Error)]
pub enum BagError {
    /// Reading the bag timed out. The requirer maps this to a broken signal.
    #[error("timed out reading relation {relation}")]
    Timeout { relation: RelationId },

    /// The relation does not exist (already removed, or never created).
    #[error("relation {relation} not found")]
    NotFound { relation: RelationId },

    /// The store is unavailable for reasons other than a timeout.
    #[error("relation store unavailable: {0}")]
    Unavailable(String),

    /// Backing storage failure, with annotated path for context.
    #[error("relation store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON encode/decode failure of a persisted relation.
    #[error("relation JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures loading or saving persisted unit state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures loading unit configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with file path and serde_yaml line context.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An option is not recognized for this workload.
    #[error("unknown option `{option}` for {workload}")]
    UnknownOption { workload: String, option: String },

    /// An option value failed validation.
    #[error("invalid value `{value}` for `{option}`: {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: String,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn state_io(path: impl Into<PathBuf>, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn config_io(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
