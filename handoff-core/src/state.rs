//! Persisted per-unit state owned by the reconciler loop.
//!
//! Stored as JSON at `<unit dir>/state.json`. Writes use the `.tmp` + rename
//! pattern so a crash never leaves a half-written state file behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{state_io, StateError};
use crate::events::{DeferredQueue, EventId};
use crate::fact::ConnectionFact;
use crate::types::{LoopPhase, Slot, UnitStatus};

/// Everything a unit must remember between events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    #[serde(default)]
    pub phase: LoopPhase,
    /// Last connection accepted from the requirer protocol.
    #[serde(default)]
    pub connection: Slot<ConnectionFact>,
    /// One-time workload setup has run against the current supervisor.
    #[serde(default)]
    pub setup_done: bool,
    #[serde(default)]
    pub status: UnitStatus,
    #[serde(default)]
    pub deferred: DeferredQueue,
    #[serde(default)]
    pub next_event_id: u64,
    /// Services declared but not yet restarted. They are restarted on the
    /// next pass even when the declared plan already matches.
    #[serde(default)]
    pub pending_restart: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for UnitState {
    fn default() -> Self {
        Self {
            phase: LoopPhase::default(),
            connection: Slot::Unset,
            setup_done: false,
            status: UnitStatus::default(),
            deferred: DeferredQueue::default(),
            next_event_id: 0,
            pending_restart: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

impl UnitState {
    /// Hand out the next event id.
    pub fn allocate_event_id(&mut self) -> EventId {
        let id = EventId(self.next_event_id);
        self.next_event_id = self.next_event_id.saturating_add(1);
        id
    }
}

/// Where a unit's state lives between events.
pub trait StateStore {
    fn load(&self) -> Result<UnitState, StateError>;
    fn save(&mut self, state: &UnitState) -> Result<(), StateError>;
}

/// Load state from `path`, returning the default state if the file is absent.
pub fn load_at(path: &Path) -> Result<UnitState, StateError> {
    if !path.exists() {
        return Ok(UnitState::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| state_io(path, e))?;
    serde_json::from_str(&contents).map_err(|source| StateError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Save state to `path` atomically (`<path>.tmp` then rename).
pub fn save_at(path: &Path, state: &UnitState) -> Result<(), StateError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| state_io(dir, e))?;
    }
    let json = serde_json::to_string_pretty(state).map_err(|source| StateError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| state_io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| state_io(path, e))?;
    Ok(())
}

/// JSON file-backed [`StateStore`].
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<UnitState, StateError> {
        load_at(&self.path)
    }

    fn save(&mut self, state: &UnitState) -> Result<(), StateError> {
        let mut stamped = state.clone();
        stamped.updated_at = Utc::now();
        save_at(&self.path, &stamped)
    }
}

/// In-memory [`StateStore`]; counts saves so callers can assert persistence.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    state: Option<UnitState>,
    saves: usize,
}

impl MemoryStateStore {
    pub fn saves(&self) -> usize {
        self.saves
    }

    pub fn last_saved(&self) -> Option<&UnitState> {
        self.state.as_ref()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<UnitState, StateError> {
        Ok(self.state.clone().unwrap_or_default())
    }

    fn save(&mut self, state: &UnitState) -> Result<(), StateError> {
        self.state = Some(state.clone());
        self.saves += 1;
        Ok(())
    }
}
