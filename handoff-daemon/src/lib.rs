//! Local host for handoff units: file-backed collaborators, a multi-unit
//! event queue and a watcher daemon that turns config edits into events.

mod error;
pub mod fs_relations;
pub mod fs_supervisor;
pub mod host;
pub mod lock;
pub mod manifest;
pub mod paths;
mod runtime;

pub use error::DaemonError;
pub use fs_relations::{FileRelationStore, RelationRecord};
pub use fs_supervisor::{FileSupervisor, RestartRecord, SupervisorRecord};
pub use host::{Delivery, Host, UnitSnapshot};
pub use manifest::UnitManifest;
pub use runtime::{init_tracing, run, start_blocking, DeliverySummary};
