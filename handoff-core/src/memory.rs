//! In-memory collaborators.
//!
//! Used for simulations and tests: a [`MemorySupervisor`] per workload and a
//! shared [`MemoryRelations`] world that hands out per-application views.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{BagError, SupervisorError};
use crate::plan::{Layer, Plan, Services};
use crate::ports::{RelationStore, Supervisor};
use crate::types::{AppName, Databag, RelationHandle, RelationId};

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// Process supervisor that keeps its plan and running services in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySupervisor {
    reachable: bool,
    plan: Plan,
    running: Services,
    layers: Vec<String>,
    restarts: Vec<Vec<String>>,
    pushed: BTreeMap<String, Vec<u8>>,
    execs: Vec<Vec<String>>,
    fail_restarts: bool,
    disconnect_after_layer: bool,
}

impl MemorySupervisor {
    /// A reachable supervisor with an empty plan.
    pub fn new() -> Self {
        Self {
            reachable: true,
            ..Self::default()
        }
    }

    /// A supervisor whose workload host is not reachable yet.
    pub fn unreachable() -> Self {
        Self::default()
    }

    pub fn set_reachable(&mut self, reachable: bool) {
        self.reachable = reachable;
    }

    /// Make every subsequent restart/replan fail.
    pub fn fail_restarts(&mut self, fail: bool) {
        self.fail_restarts = fail;
    }

    /// Become unreachable right after the next successful `add_layer`.
    pub fn disconnect_after_layer(&mut self) {
        self.disconnect_after_layer = true;
    }

    /// Every restart operation, with the services it restarted.
    pub fn restarts(&self) -> &[Vec<String>] {
        &self.restarts
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.len()
    }

    /// Restarts that touched `service`.
    pub fn restarts_of(&self, service: &str) -> usize {
        self.restarts
            .iter()
            .filter(|names| names.iter().any(|n| n == service))
            .count()
    }

    pub fn declared(&self) -> &Plan {
        &self.plan
    }

    pub fn layer_labels(&self) -> &[String] {
        &self.layers
    }

    pub fn pushed(&self, path: &str) -> Option<&[u8]> {
        self.pushed.get(path).map(Vec::as_slice)
    }

    pub fn execs(&self) -> &[Vec<String>] {
        &self.execs
    }

    fn ensure_reachable(&self) -> Result<(), SupervisorError> {
        if self.reachable {
            Ok(())
        } else {
            Err(SupervisorError::Unreachable {
                reason: "workload container not reachable".to_string(),
            })
        }
    }

    fn ensure_restartable(&self) -> Result<(), SupervisorError> {
        if self.fail_restarts {
            Err(SupervisorError::Rejected("restart failed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Supervisor for MemorySupervisor {
    fn can_connect(&self) -> bool {
        self.reachable
    }

    fn plan(&self) -> Result<Plan, SupervisorError> {
        self.ensure_reachable()?;
        Ok(self.plan.clone())
    }

    fn add_layer(
        &mut self,
        label: &str,
        layer: &Layer,
        combine: bool,
    ) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        let exists = self.layers.iter().any(|l| l == label);
        if exists && !combine {
            return Err(SupervisorError::Rejected(format!(
                "layer `{label}` already exists"
            )));
        }
        self.plan.combine(layer);
        if !exists {
            self.layers.push(label.to_string());
        }
        if std::mem::take(&mut self.disconnect_after_layer) {
            self.reachable = false;
        }
        Ok(())
    }

    fn restart(&mut self, services: &[String]) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        self.ensure_restartable()?;
        for name in services {
            let Some(service) = self.plan.services.get(name) else {
                return Err(SupervisorError::Rejected(format!(
                    "service `{name}` is not in the plan"
                )));
            };
            self.running.insert(name.clone(), service.clone());
        }
        self.restarts.push(services.to_vec());
        Ok(())
    }

    fn replan(&mut self) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        self.ensure_restartable()?;
        let changed: Vec<String> = self
            .plan
            .services
            .iter()
            .filter(|(name, def)| self.running.get(*name) != Some(*def))
            .map(|(name, _)| name.clone())
            .collect();
        if changed.is_empty() {
            return Ok(());
        }
        for name in &changed {
            if let Some(def) = self.plan.services.get(name) {
                self.running.insert(name.clone(), def.clone());
            }
        }
        self.restarts.push(changed);
        Ok(())
    }

    fn push(&mut self, path: &str, contents: &[u8]) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        self.pushed.insert(path.to_string(), contents.to_vec());
        Ok(())
    }

    fn exec(&mut self, argv: &[String]) -> Result<(), SupervisorError> {
        self.ensure_reachable()?;
        self.execs.push(argv.to_vec());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Relations
// ---------------------------------------------------------------------------

/// Injected failure for remote-bag reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFailure {
    Timeout,
    Unavailable,
}

#[derive(Debug, Clone)]
struct RelationRecord {
    endpoint: String,
    provider: AppName,
    requirer: AppName,
    bags: BTreeMap<AppName, Databag>,
}

impl RelationRecord {
    fn remote_of(&self, app: &AppName) -> Option<&AppName> {
        if *app == self.provider {
            Some(&self.requirer)
        } else if *app == self.requirer {
            Some(&self.provider)
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
struct RelationWorld {
    next_id: u32,
    relations: BTreeMap<RelationId, RelationRecord>,
    failures: BTreeMap<RelationId, ReadFailure>,
    writes: usize,
}

/// Shared relation data for every application in a simulation.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelations {
    world: Rc<RefCell<RelationWorld>>,
}

impl MemoryRelations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a relation on `endpoint` between two applications.
    pub fn relate(&self, endpoint: &str, provider: &AppName, requirer: &AppName) -> RelationId {
        let mut world = self.world.borrow_mut();
        world.next_id = world.next_id.saturating_add(1);
        let id = RelationId(world.next_id);
        world.relations.insert(
            id,
            RelationRecord {
                endpoint: endpoint.to_string(),
                provider: provider.clone(),
                requirer: requirer.clone(),
                bags: BTreeMap::new(),
            },
        );
        id
    }

    pub fn remove(&self, relation: RelationId) {
        let mut world = self.world.borrow_mut();
        world.relations.remove(&relation);
        world.failures.remove(&relation);
    }

    /// The [`RelationStore`] seen by `app`.
    pub fn view(&self, app: &AppName) -> AppRelations {
        AppRelations {
            app: app.clone(),
            world: Rc::clone(&self.world),
        }
    }

    /// Inspect the bag written by `app`.
    pub fn bag(&self, relation: RelationId, app: &AppName) -> Databag {
        self.world
            .borrow()
            .relations
            .get(&relation)
            .and_then(|r| r.bags.get(app).cloned())
            .unwrap_or_default()
    }

    /// Overwrite the bag of `app` directly, bypassing leadership checks.
    pub fn set_bag(&self, relation: RelationId, app: &AppName, bag: Databag) {
        if let Some(record) = self.world.borrow_mut().relations.get_mut(&relation) {
            record.bags.insert(app.clone(), bag);
        }
    }

    pub fn fail_reads(&self, relation: RelationId, failure: ReadFailure) {
        self.world.borrow_mut().failures.insert(relation, failure);
    }

    /// Number of bag writes performed through any view.
    pub fn writes(&self) -> usize {
        self.world.borrow().writes
    }
}

/// One application's view of a [`MemoryRelations`] world.
#[derive(Debug, Clone)]
pub struct AppRelations {
    app: AppName,
    world: Rc<RefCell<RelationWorld>>,
}

impl AppRelations {
    fn remote_app(&self, relation: RelationId) -> Result<AppName, BagError> {
        let world = self.world.borrow();
        world
            .relations
            .get(&relation)
            .and_then(|r| r.remote_of(&self.app).cloned())
            .ok_or(BagError::NotFound { relation })
    }
}

impl RelationStore for AppRelations {
    fn relations(&self, endpoint: &str) -> Result<Vec<RelationHandle>, BagError> {
        let world = self.world.borrow();
        Ok(world
            .relations
            .iter()
            .filter(|(_, r)| r.endpoint == endpoint)
            .filter_map(|(id, r)| {
                r.remote_of(&self.app).map(|remote| RelationHandle {
                    id: *id,
                    endpoint: r.endpoint.clone(),
                    remote_app: remote.clone(),
                })
            })
            .collect())
    }

    fn read_remote(&self, relation: RelationId) -> Result<Databag, BagError> {
        let remote = self.remote_app(relation)?;
        let world = self.world.borrow();
        match world.failures.get(&relation) {
            Some(ReadFailure::Timeout) => return Err(BagError::Timeout { relation }),
            Some(ReadFailure::Unavailable) => {
                return Err(BagError::Unavailable("injected failure".to_string()))
            }
            None => {}
        }
        Ok(world
            .relations
            .get(&relation)
            .and_then(|r| r.bags.get(&remote).cloned())
            .unwrap_or_default())
    }

    fn read_local(&self, relation: RelationId) -> Result<Databag, BagError> {
        self.remote_app(relation)?;
        let world = self.world.borrow();
        Ok(world
            .relations
            .get(&relation)
            .and_then(|r| r.bags.get(&self.app).cloned())
            .unwrap_or_default())
    }

    fn write_local(&mut self, relation: RelationId, data: &Databag) -> Result<(), BagError> {
        self.remote_app(relation)?;
        let mut world = self.world.borrow_mut();
        world.writes = world.writes.saturating_add(1);
        if let Some(record) = world.relations.get_mut(&relation) {
            record.bags.insert(self.app.clone(), data.clone());
        }
        Ok(())
    }
}
