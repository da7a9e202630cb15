//! Handoff core library: domain types, collaborator interfaces, persisted
//! unit state, configuration and errors.
//!
//! - [`fact`]: [`ConnectionFact`] and its relation-bag encoding
//! - [`plan`]: desired [`Layer`] and observed [`Plan`] service specs
//! - [`events`]: [`LifecycleEvent`] and the [`DeferredQueue`]
//! - [`state`]: [`UnitState`] and [`StateStore`]
//! - [`ports`]: [`Supervisor`], [`RelationStore`], [`Leadership`]
//! - [`memory`]: in-memory collaborators
//! - [`config`], [`network`]: unit configuration and address discovery

pub mod config;
pub mod error;
pub mod events;
pub mod fact;
pub mod memory;
pub mod network;
pub mod plan;
pub mod ports;
pub mod state;
pub mod types;

pub use config::{AppendOnly, KeyValueStoreConfig, UnitConfig, WebFrontendConfig};
pub use error::{BagError, ConfigError, FactError, StateError, SupervisorError};
pub use events::{DeferredQueue, EventId, LifecycleEvent, PendingEvent};
pub use fact::ConnectionFact;
pub use plan::{Environment, Layer, Override, Plan, Service, Services, Startup};
pub use ports::{Leadership, RelationStore, Supervisor};
pub use state::{FileStateStore, MemoryStateStore, StateStore, UnitState};
pub use types::{
    AppName, Databag, LoopPhase, RelationHandle, RelationId, Role, Slot, UnitName, UnitStatus,
    WorkloadKind,
};
