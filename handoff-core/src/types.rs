//! Domain types shared by both sides of a relation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A unit name of the form `<app>/<n>`, e.g. `keydb/0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitName(pub String);

impl UnitName {
    /// The application part of the unit name (everything before the last `/`).
    pub fn app(&self) -> AppName {
        match self.0.rsplit_once('/') {
            Some((app, _)) => AppName::from(app),
            None => AppName::from(self.0.as_str()),
        }
    }

    /// Filesystem-safe form: `keydb/0` becomes `keydb-0`.
    pub fn slug(&self) -> String {
        self.0.replace('/', "-")
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for UnitName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UnitName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// The name of a deployed application (all units share it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppName(pub String);

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for AppName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AppName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of one relation instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RelationId(pub u32);

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// String-keyed bag of relation data written by one application.
pub type Databag = BTreeMap<String, String>;

/// One instance of a producer/consumer pairing, as seen from the local side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationHandle {
    pub id: RelationId,
    /// Endpoint name the relation is bound to, e.g. `db`.
    pub endpoint: String,
    /// The application on the other side.
    pub remote_app: AppName,
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The managed workloads this controller knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadKind {
    KeyValueStore,
    WebFrontend,
}

impl WorkloadKind {
    /// All workload kinds in a stable order.
    pub fn all() -> &'static [WorkloadKind] {
        &[WorkloadKind::KeyValueStore, WorkloadKind::WebFrontend]
    }

    /// Which side of the `db` relation this workload plays.
    pub fn role(&self) -> Role {
        match self {
            WorkloadKind::KeyValueStore => Role::Provider,
            WorkloadKind::WebFrontend => Role::Requirer,
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::KeyValueStore => write!(f, "key-value-store"),
            WorkloadKind::WebFrontend => write!(f, "web-frontend"),
        }
    }
}

/// Side of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Provider,
    Requirer,
}

/// Status a unit reports upward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    #[default]
    Unknown,
    Maintenance(String),
    Waiting(String),
    Active,
    Blocked(String),
}

impl UnitStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, UnitStatus::Active)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, UnitStatus::Waiting(_))
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Unknown => write!(f, "unknown"),
            UnitStatus::Maintenance(msg) => write!(f, "maintenance: {msg}"),
            UnitStatus::Waiting(msg) => write!(f, "waiting: {msg}"),
            UnitStatus::Active => write!(f, "active"),
            UnitStatus::Blocked(msg) => write!(f, "blocked: {msg}"),
        }
    }
}

/// Reconciler loop state. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LoopPhase {
    #[default]
    WaitingForSupervisor,
    Active,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPhase::WaitingForSupervisor => write!(f, "waiting-for-supervisor"),
            LoopPhase::Active => write!(f, "active"),
        }
    }
}

/// A persisted value with an explicit "never set" marker.
///
/// Serialized as `{"state": "unset"}` or `{"state": "set", "value": ...}` so a
/// stored null can never be confused with an absent value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum Slot<T> {
    Unset,
    Set(T),
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Unset
    }
}

impl<T> Slot<T> {
    pub fn as_option(&self) -> Option<&T> {
        match self {
            Slot::Unset => None,
            Slot::Set(value) => Some(value),
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Slot::Set(_))
    }
}

impl<T> From<Option<T>> for Slot<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Slot::Set(v),
            None => Slot::Unset,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
