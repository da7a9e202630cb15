//! Interfaces of the external collaborators.
//!
//! The controller never talks to a process manager or a relation store
//! directly; it goes through these traits. Every call is a single bounded
//! request/response.

use crate::error::{BagError, SupervisorError};
use crate::plan::{Layer, Plan};
use crate::types::{Databag, RelationHandle, RelationId};

/// The process supervisor running a workload's declared services.
pub trait Supervisor {
    /// Cheap reachability check.
    fn can_connect(&self) -> bool;

    /// The currently declared plan. Fetched fresh on every call.
    fn plan(&self) -> Result<Plan, SupervisorError>;

    /// Declare `layer` under `label`. With `combine`, same-named services are
    /// overridden and the rest of the plan is left untouched.
    fn add_layer(&mut self, label: &str, layer: &Layer, combine: bool)
        -> Result<(), SupervisorError>;

    /// Restart exactly the named services.
    fn restart(&mut self, services: &[String]) -> Result<(), SupervisorError>;

    /// Bring running services in line with the plan, restarting only those
    /// whose definition changed.
    fn replan(&mut self) -> Result<(), SupervisorError>;

    /// Write a file into the workload.
    fn push(&mut self, path: &str, contents: &[u8]) -> Result<(), SupervisorError>;

    /// Run a setup command inside the workload and wait for it.
    fn exec(&mut self, argv: &[String]) -> Result<(), SupervisorError>;
}

/// Shared relation data, as seen by one application.
///
/// Each relation has one writable bag per side; the local application may
/// only write its own bag and read the remote one.
pub trait RelationStore {
    /// Live relations bound to `endpoint`, ordered by id.
    fn relations(&self, endpoint: &str) -> Result<Vec<RelationHandle>, BagError>;

    /// The remote application's bag.
    fn read_remote(&self, relation: RelationId) -> Result<Databag, BagError>;

    /// The local application's bag.
    fn read_local(&self, relation: RelationId) -> Result<Databag, BagError>;

    /// Replace the local application's bag.
    fn write_local(&mut self, relation: RelationId, data: &Databag) -> Result<(), BagError>;
}

/// Leadership oracle. Only the leader may write application-scoped data.
pub trait Leadership {
    fn is_leader(&self) -> bool;
}

impl Leadership for bool {
    fn is_leader(&self) -> bool {
        *self
    }
}
